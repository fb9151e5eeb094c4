//! Console log output, captured with `tracing-test`.

use std::sync::Arc;

use mocap_console::calibration::{CalibrationConfigStore, ConfigField, MemoryStore};
use mocap_console::config::ConsoleConfig;
use mocap_console::context::{ConsoleContext, Outbox};
use mocap_console::mode::{ModeController, OperatingMode};
use tracing_test::traced_test;

#[test]
#[traced_test]
fn mode_changes_and_calibration_loads_are_logged() {
    let (outbox, _requests) = Outbox::channel();
    let ctx = ConsoleContext::new(outbox, Arc::new(ConsoleConfig::default()));

    let mut mode = ModeController::default();
    mode.on_confirmed(OperatingMode::Triangulation);
    let err = mode.on_rejected("cameras busy");
    assert_eq!(err.to_string(), "Mode change rejected: cameras busy");

    let mut store = CalibrationConfigStore::new(Arc::new(MemoryStore::new()), false);
    assert!(store.load(&ctx).unwrap().is_empty());
    store
        .edit(ConfigField::WorldTransform, "[[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]]")
        .unwrap();

    assert!(logs_contain("operating mode changed"));
    assert!(logs_contain("mode change rejected"));
    assert!(logs_contain("calibration loaded from storage"));
}
