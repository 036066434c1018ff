//! Runtime wiring: the event-loop task, handle queries, and listener
//! registration.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{
    MockBroadcaster, MockDiagnostics, MockEngine, MockMetrics, MockNative, MockSettings,
    MockSoftApCallback, MockTelephony,
};
use tokio::sync::mpsc;
use wifi_warden::deps::{RecoverySlot, WardenConfig, WardenDeps};
use wifi_warden::events::EventPoster;
use wifi_warden::runtime::WardenRuntime;
use wifi_warden::timer::ManualTimerService;
use wifi_warden::warden::WardenState;
use wifi_warden_core::types::{Role, WifiState};

struct RuntimeFixture {
    native: Arc<MockNative>,
    settings: Arc<MockSettings>,
    broadcaster: Arc<MockBroadcaster>,
    deps: WardenDeps,
}

fn fixture() -> RuntimeFixture {
    let native = MockNative::new();
    let settings = MockSettings::new();
    let broadcaster = MockBroadcaster::new();
    // The runtime replaces the poster with one for its own queue.
    let (placeholder_tx, _placeholder_rx) = mpsc::unbounded_channel();
    let deps = WardenDeps {
        native: native.clone(),
        settings: settings.clone(),
        telephony: MockTelephony::new(),
        broadcaster: broadcaster.clone(),
        engine: MockEngine::new(),
        softap_callback: MockSoftApCallback::new(),
        lohs_callback: MockSoftApCallback::new(),
        metrics: MockMetrics::new(),
        diagnostics: MockDiagnostics::new(),
        timers: Arc::new(ManualTimerService::new()),
        poster: EventPoster::new(placeholder_tx),
        recovery: RecoverySlot::new(),
        config: WardenConfig::default(),
    };
    RuntimeFixture {
        native,
        settings,
        broadcaster,
        deps,
    }
}

#[tokio::test]
async fn runtime_answers_queries_on_the_loop() {
    let fx = fixture();
    fx.settings.wifi_toggle.store(true, Ordering::SeqCst);
    let (handle, runtime) = WardenRuntime::new(fx.deps);
    tokio::spawn(runtime.run());

    // The initial state was derived from settings at construction; the
    // queued start messages drain before the query is answered.
    assert_eq!(handle.wifi_state().await, WifiState::Enabled);
    let managers = handle.live_managers().await;
    assert_eq!(managers.len(), 1);
    assert_eq!(managers[0].1, Some(Role::ClientPrimary));
    assert!(handle.is_sta_ap_concurrency_supported().await);
    assert!(!handle.is_in_emergency_mode().await);
}

#[tokio::test]
async fn runtime_processes_toggles_in_order() {
    let fx = fixture();
    let (handle, mut runtime) = WardenRuntime::new(fx.deps);
    assert_eq!(runtime.core().state(), WardenState::Disabled);

    fx.settings.wifi_toggle.store(true, Ordering::SeqCst);
    handle.wifi_toggled();
    runtime.drain_now();
    assert_eq!(runtime.core().state(), WardenState::Enabled);

    fx.settings.wifi_toggle.store(false, Ordering::SeqCst);
    handle.wifi_toggled();
    runtime.drain_now();
    assert_eq!(runtime.core().state(), WardenState::Disabled);

    // Broadcast history covers the full up/down walk.
    assert_eq!(
        fx.broadcaster.wifi_transitions(),
        vec![
            (WifiState::Enabling, WifiState::Disabled),
            (WifiState::Enabled, WifiState::Enabling),
            (WifiState::Disabling, WifiState::Enabled),
            (WifiState::Disabled, WifiState::Disabling),
        ]
    );
}

#[tokio::test]
async fn runtime_registers_native_listeners() {
    let fx = fixture();
    let (_handle, _runtime) = WardenRuntime::new(fx.deps);
    // Daemon status wiring is installed during construction.
    assert!(fx.native.status_sink.lock().is_some());
}

#[tokio::test]
async fn shutting_down_flag_suppresses_recovery() {
    let fx = fixture();
    let (handle, mut runtime) = WardenRuntime::new(fx.deps);
    let recovery = Arc::new(common::MockRecovery::default());
    runtime.install_recovery(recovery.clone());

    handle.notify_shutting_down();
    fx.native.report_daemon_death();
    runtime.drain_now();

    assert!(recovery.triggers.lock().is_empty());
}

#[tokio::test]
async fn daemon_death_triggers_installed_recovery() {
    let fx = fixture();
    let (_handle, mut runtime) = WardenRuntime::new(fx.deps);
    let recovery = Arc::new(common::MockRecovery::default());
    runtime.install_recovery(recovery.clone());

    fx.native.report_daemon_death();
    runtime.drain_now();

    assert_eq!(
        recovery.triggers.lock().clone(),
        vec![wifi_warden_core::RecoveryReason::WifiNativeFailure]
    );
}
