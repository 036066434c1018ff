//! Soft AP manager behavior: client admission, idle timeout, pending
//! disconnects, in-place config updates, paired-interface modes, and
//! start-failure reasons.

mod common;

use std::sync::atomic::Ordering;

use common::{mac, TestHarness};
use wifi_warden::events::{SoftApMessage, WardenEvent};
use wifi_warden::softap::PENDING_DISCONNECT_RECHECK_MS;
use wifi_warden::warden::WardenState;
use wifi_warden_core::error::SoftApStartError;
use wifi_warden_core::types::{
    ApState, Band, ClientBlockReason, SecurityType, SoftApCapability, SoftApConfig, SoftApFeature,
    SoftApInfo, SoftApMode, SoftApModeConfig, WifiStandard, WorkSource,
};
use wifi_warden_core::{ChannelBandwidth, SoftApHalEvent};

fn ap_config(features: &[SoftApFeature], max_supported: usize) -> SoftApModeConfig {
    SoftApModeConfig {
        mode: SoftApMode::Tethered,
        config: SoftApConfig {
            ssid: "TestAp".to_string(),
            band: Band::Band2Ghz,
            ..SoftApConfig::default()
        },
        capability: SoftApCapability::new(features.iter().copied(), max_supported),
        requestor: WorkSource::new(1000, "tethering"),
    }
}

fn started_harness(config: SoftApModeConfig) -> TestHarness {
    let mut h = TestHarness::new();
    h.start();
    h.send(WardenEvent::StartSoftAp(Box::new(config)));
    assert_eq!(h.warden.softaps().len(), 1, "soft AP failed to start");
    h
}

fn connect_client(h: &mut TestHarness, last_octet: u8) {
    let id = h.warden.softaps()[0].id();
    h.send(WardenEvent::SoftAp(
        id,
        SoftApMessage::AssociatedStationChanged {
            mac: mac(last_octet),
            connected: true,
        },
    ));
}

#[test]
fn max_clients_blocks_third_station_and_reports_once() {
    let mut h = started_harness(ap_config(&[SoftApFeature::ClientForceDisconnect], 2));
    connect_client(&mut h, 1);
    connect_client(&mut h, 2);
    assert_eq!(h.warden.softaps()[0].connected_clients().len(), 2);

    connect_client(&mut h, 3);

    // Rejected with NO_MORE_STAS; connected set unchanged.
    assert_eq!(h.warden.softaps()[0].connected_clients().len(), 2);
    assert_eq!(
        h.softap_callback.blocked.lock().clone(),
        vec![(mac(3), ClientBlockReason::NoMoreStas)]
    );
    assert!(h
        .native
        .disconnects
        .lock()
        .contains(&("ap0".to_string(), mac(3), ClientBlockReason::NoMoreStas)));
    // The capacity metric fires once per settings epoch.
    assert_eq!(h.metrics.client_blocked.lock().clone(), vec![2]);
    connect_client(&mut h, 4);
    assert_eq!(h.metrics.client_blocked.lock().len(), 1);
}

#[test]
fn user_max_tightens_hardware_limit() {
    let mut config = ap_config(&[SoftApFeature::ClientForceDisconnect], 8);
    config.config.max_clients = 1;
    let mut h = started_harness(config);

    connect_client(&mut h, 1);
    connect_client(&mut h, 2);

    assert_eq!(h.warden.softaps()[0].connected_clients().len(), 1);
    assert_eq!(h.metrics.client_blocked.lock().clone(), vec![1]);
}

#[test]
fn blocked_list_rejects_without_blocked_callback() {
    let mut config = ap_config(&[SoftApFeature::ClientForceDisconnect], 8);
    config.config.blocked_clients.insert(mac(9));
    let mut h = started_harness(config);

    connect_client(&mut h, 9);

    assert!(h.warden.softaps()[0].connected_clients().is_empty());
    // Blocked-list rejections disconnect silently.
    assert!(h.softap_callback.blocked.lock().is_empty());
    assert!(h
        .native
        .disconnects
        .lock()
        .contains(&("ap0".to_string(), mac(9), ClientBlockReason::BlockedByUser)));
}

#[test]
fn user_allow_list_rejects_unknown_clients() {
    let mut config = ap_config(&[SoftApFeature::ClientForceDisconnect], 8);
    config.config.client_control_by_user = true;
    config.config.allowed_clients.insert(mac(1));
    let mut h = started_harness(config);

    connect_client(&mut h, 1);
    connect_client(&mut h, 2);

    assert_eq!(h.warden.softaps()[0].connected_clients(), &[mac(1)]);
    assert_eq!(
        h.softap_callback.blocked.lock().clone(),
        vec![(mac(2), ClientBlockReason::BlockedByUser)]
    );
}

#[test]
fn failed_disconnect_lands_on_pending_list_and_is_retried() {
    let mut config = ap_config(&[SoftApFeature::ClientForceDisconnect], 8);
    config.config.blocked_clients.insert(mac(9));
    let mut h = started_harness(config);

    h.native.force_disconnect_ok.store(false, Ordering::SeqCst);
    connect_client(&mut h, 9);

    // The recheck timer is armed at the documented period.
    let delays = h.timers.pending_delays();
    assert!(delays
        .iter()
        .any(|d| d.as_millis() as u64 == PENDING_DISCONNECT_RECHECK_MS));

    // Native recovers; the retry drains the kick but keeps the entry until
    // the disassociation event arrives.
    h.native.force_disconnect_ok.store(true, Ordering::SeqCst);
    let before = h.native.disconnects.lock().len();
    h.fire_next_timer();
    assert!(h.native.disconnects.lock().len() > before);

    let id = h.warden.softaps()[0].id();
    h.send(WardenEvent::SoftAp(
        id,
        SoftApMessage::AssociatedStationChanged {
            mac: mac(9),
            connected: false,
        },
    ));
}

#[test]
fn idle_timeout_shuts_the_ap_down() {
    let h = &mut started_harness(ap_config(&[], 8));
    // Only the idle timer is armed.
    assert_eq!(h.timers.pending_count(), 1);

    h.fire_next_timer();

    assert!(h.warden.softaps().is_empty());
    assert_eq!(h.warden.state(), WardenState::Disabled);
    let ap = h.broadcaster.ap_transitions();
    assert!(ap.contains(&(ApState::Disabling, ApState::Enabled, None)));
    assert_eq!(ap.last(), Some(&(ApState::Disabled, ApState::Disabling, None)));
}

#[test]
fn idle_timeout_is_rescheduled_by_associations() {
    let mut h = started_harness(ap_config(&[SoftApFeature::ClientForceDisconnect], 8));
    connect_client(&mut h, 1);

    // Timer fired while a client is connected: dropped.
    h.fire_next_timer();
    assert_eq!(h.warden.softaps().len(), 1);

    // Client leaves; the reschedule from the disassociation eventually
    // brings the AP down.
    let id = h.warden.softaps()[0].id();
    h.send(WardenEvent::SoftAp(
        id,
        SoftApMessage::AssociatedStationChanged {
            mac: mac(1),
            connected: false,
        },
    ));
    h.fire_next_timer();
    assert!(h.warden.softaps().is_empty());
}

#[test]
fn auto_shutdown_disabled_schedules_no_idle_timer() {
    let mut config = ap_config(&[], 8);
    config.config.auto_shutdown_enabled = false;
    let h = started_harness(config);
    assert_eq!(h.timers.pending_count(), 0);
}

#[test]
fn config_update_without_restart_applies_in_place() {
    let mut h = started_harness(ap_config(&[SoftApFeature::ClientForceDisconnect], 8));
    connect_client(&mut h, 1);
    connect_client(&mut h, 2);

    // Block one connected client via a soft config update.
    let mut new_config = SoftApConfig {
        ssid: "TestAp".to_string(),
        band: Band::Band2Ghz,
        ..SoftApConfig::default()
    };
    new_config.blocked_clients.insert(mac(1));
    h.send(WardenEvent::UpdateSoftApConfig(Box::new(new_config)));

    // The newly disallowed client gets kicked.
    assert!(h
        .native
        .disconnects
        .lock()
        .contains(&("ap0".to_string(), mac(1), ClientBlockReason::BlockedByUser)));
    // Still one live AP, still started.
    assert_eq!(h.warden.softaps().len(), 1);
}

#[test]
fn config_update_requiring_restart_is_ignored() {
    let mut h = started_harness(ap_config(&[], 8));

    let new_config = SoftApConfig {
        ssid: "DifferentSsid".to_string(),
        band: Band::Band2Ghz,
        ..SoftApConfig::default()
    };
    h.send(WardenEvent::UpdateSoftApConfig(Box::new(new_config)));

    // Nothing restarted, nothing torn down.
    assert_eq!(h.warden.softaps().len(), 1);
    assert!(h.native.calls_matching("teardown").is_empty());
    assert_eq!(h.native.calls_matching("start_soft_ap").len(), 1);
}

#[test]
fn capability_update_reevaluates_admission_for_tethered() {
    let mut h = started_harness(ap_config(&[SoftApFeature::ClientForceDisconnect], 8));
    connect_client(&mut h, 1);
    connect_client(&mut h, 2);

    // Carrier tightens the cap to 1; one client has to go.
    h.send(WardenEvent::UpdateSoftApCapability(SoftApCapability::new(
        [SoftApFeature::ClientForceDisconnect],
        1,
    )));
    assert!(h
        .native
        .disconnects
        .lock()
        .iter()
        .any(|(_, _, reason)| *reason == ClientBlockReason::NoMoreStas));
}

#[test]
fn five_ghz_without_country_code_fails_with_no_channel() {
    let mut config = ap_config(&[], 8);
    config.config.band = Band::Band5Ghz;

    let mut h = TestHarness::new();
    h.start();
    h.send(WardenEvent::StartSoftAp(Box::new(config)));

    assert!(h.warden.softaps().is_empty());
    assert_eq!(h.warden.state(), WardenState::Disabled);
    let ap = h.broadcaster.ap_transitions();
    assert!(ap.contains(&(
        ApState::Failed,
        ApState::Enabling,
        Some(SoftApStartError::NoChannel)
    )));
    assert_eq!(
        h.metrics.softap_start_results.lock().clone(),
        vec![(false, Some(SoftApStartError::NoChannel))]
    );
    let interred: Vec<_> = h.warden.graveyard().softaps().collect();
    assert_eq!(interred.len(), 1);
    assert!(interred[0].start_failed);
}

#[test]
fn empty_ssid_fails_start() {
    let mut config = ap_config(&[], 8);
    config.config.ssid.clear();

    let mut h = TestHarness::new();
    h.start();
    h.send(WardenEvent::StartSoftAp(Box::new(config)));

    assert!(h.warden.softaps().is_empty());
    let ap = h.broadcaster.ap_transitions();
    assert!(ap.contains(&(
        ApState::Failed,
        ApState::Disabled,
        Some(SoftApStartError::Generic)
    )));
}

#[test]
fn hostapd_start_failure_tears_down_interface() {
    let mut h = TestHarness::new();
    h.start();
    h.native.fail_start_softap.store(true, Ordering::SeqCst);
    h.send(WardenEvent::StartSoftAp(Box::new(ap_config(&[], 8))));

    assert!(h.warden.softaps().is_empty());
    assert_eq!(h.native.calls_matching("teardown ap0").len(), 1);
}

#[test]
fn hal_failure_in_started_reports_failed_then_disables() {
    let mut h = started_harness(ap_config(&[], 8));
    h.native.fire_hal_event("ap0", SoftApHalEvent::Failure);
    h.pump();

    assert!(h.warden.softaps().is_empty());
    let ap = h.broadcaster.ap_transitions();
    assert!(ap.contains(&(
        ApState::Failed,
        ApState::Enabled,
        Some(SoftApStartError::Generic)
    )));
    assert_eq!(ap.last(), Some(&(ApState::Disabled, ApState::Disabling, None)));
}

#[test]
fn info_changes_flow_to_the_callback() {
    let mut h = started_harness(ap_config(&[], 8));
    let info = SoftApInfo {
        frequency_mhz: 2437,
        bandwidth: ChannelBandwidth::Bw40,
        standard: WifiStandard::Ax,
        bssid: Some(mac(0xAA)),
    };
    h.native
        .fire_hal_event("ap0", SoftApHalEvent::InfoChanged(info.clone()));
    h.pump();

    assert_eq!(h.softap_callback.infos.lock().last(), Some(&info));

    // Duplicate updates are suppressed.
    let count = h.softap_callback.infos.lock().len();
    h.native
        .fire_hal_event("ap0", SoftApHalEvent::InfoChanged(info));
    h.pump();
    assert_eq!(h.softap_callback.infos.lock().len(), count);
}

#[test]
fn dual_band_start_creates_two_interfaces_and_a_bridge() {
    let mut config = ap_config(&[], 8);
    config.config.band = Band::BandDual;
    // The 5 GHz half needs a regulatory domain.
    let mut h = TestHarness::with_config(wifi_warden::WardenConfig {
        country_code: Some("US".to_string()),
        ..wifi_warden::WardenConfig::default()
    });
    h.start();
    h.send(WardenEvent::StartSoftAp(Box::new(config)));
    assert_eq!(h.warden.softaps().len(), 1, "soft AP failed to start");

    assert_eq!(h.native.calls_matching("setup_softap").len(), 2);
    assert_eq!(h.native.calls_matching("setup_bridge").len(), 1);
    let configs = h.native.hostapd_configs.lock().clone();
    assert_eq!(configs.len(), 2);
    assert_eq!(configs[0].1.band, Band::Band2Ghz);
    assert_eq!(configs[1].1.band, Band::Band5Ghz);
    // The data interface is the bridge.
    assert!(h.warden.softaps()[0].iface().unwrap().starts_with("br"));
}

#[test]
fn owe_transition_pairs_hidden_owe_with_open_ssid() {
    let mut config = ap_config(&[], 8);
    config.config.security = SecurityType::Owe;
    config.config.bssid = Some(mac(0x10));
    let h = started_harness(config);

    let configs = h.native.hostapd_configs.lock().clone();
    assert_eq!(configs.len(), 2);

    let owe_half = &configs[0].1;
    assert!(owe_half.ssid.starts_with("OWE_"));
    assert!(owe_half.hidden);
    assert_eq!(owe_half.security, SecurityType::Owe);
    assert_eq!(owe_half.owe_transition_iface.as_deref(), Some(configs[1].0.as_str()));

    let open_half = &configs[1].1;
    assert_eq!(open_half.ssid, "TestAp");
    assert_eq!(open_half.security, SecurityType::Open);
    assert!(open_half.passphrase.is_none());
    // Companion BSSID has the flipped low bit.
    assert_eq!(open_half.bssid, Some(mac(0x11)));
}

#[test]
fn band_interface_destroyed_cleans_up_the_pair() {
    let mut config = ap_config(&[], 8);
    config.config.band = Band::BandDual;
    let mut h = TestHarness::with_config(wifi_warden::WardenConfig {
        country_code: Some("US".to_string()),
        ..wifi_warden::WardenConfig::default()
    });
    h.start();
    h.send(WardenEvent::StartSoftAp(Box::new(config)));
    assert_eq!(h.warden.softaps().len(), 1, "soft AP failed to start");

    // First band interface dies underneath the bridge.
    h.native.fire_iface_event(
        "ap0",
        wifi_warden_core::InterfaceEvent::Destroyed {
            iface: "ap0".to_string(),
        },
    );
    h.pump();

    // The sibling and the bridge are torn down in response.
    assert_eq!(h.native.calls_matching("teardown ap1").len(), 1);
    assert_eq!(h.native.calls_matching("teardown br2").len(), 1);

    // The bridge destroy completes the exit.
    h.native.fire_iface_event(
        "br2",
        wifi_warden_core::InterfaceEvent::Destroyed {
            iface: "br2".to_string(),
        },
    );
    h.pump();
    assert!(h.warden.softaps().is_empty());
    h.assert_invariants();
}

#[test]
fn stop_disconnects_all_clients_with_broadcast_mac() {
    let mut h = started_harness(ap_config(&[SoftApFeature::ClientForceDisconnect], 8));
    connect_client(&mut h, 1);

    let id = h.warden.softaps()[0].id();
    h.send(WardenEvent::SoftAp(id, SoftApMessage::Stop));

    assert!(h
        .native
        .disconnects
        .lock()
        .iter()
        .any(|(_, mac, _)| *mac == wifi_warden_core::MacAddress::BROADCAST));
    // The cleared client list was pushed to the callback.
    assert!(h.softap_callback.latest_clients().is_empty());
}
