//! The calibration configuration store.
//!
//! This is the one piece of state that several origins write to: operator edits,
//! remote updates from the sensing service and successful solves. All writes happen
//! on the console's event loop, so the last event to arrive wins and no locking is
//! needed.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{CalibrationConfig, ConfigField, KeyValueStore};
use crate::context::ConsoleContext;
use crate::error::{ConsoleError, ConsoleResult};

/// Holds the live calibration and reconciles it with storage and the service.
pub struct CalibrationConfigStore {
    config: CalibrationConfig,
    storage: Arc<dyn KeyValueStore>,
    strict_shapes: bool,
}

impl std::fmt::Debug for CalibrationConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationConfigStore")
            .field("config", &self.config)
            .field("strict_shapes", &self.strict_shapes)
            .finish_non_exhaustive()
    }
}

impl CalibrationConfigStore {
    /// Create an empty store over `storage`.
    pub fn new(storage: Arc<dyn KeyValueStore>, strict_shapes: bool) -> Self {
        Self {
            config: CalibrationConfig::default(),
            storage,
            strict_shapes,
        }
    }

    /// Current calibration.
    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Owned copy of the current calibration, e.g. for an export.
    pub fn snapshot(&self) -> CalibrationConfig {
        self.config.clone()
    }

    /// Read every field present in storage into memory.
    ///
    /// Missing keys keep their in-memory value; blobs that fail to parse are skipped.
    /// Loaded fields are pushed to the service when the link is up.
    pub fn load(&mut self, ctx: &ConsoleContext) -> ConsoleResult<Vec<ConfigField>> {
        let mut loaded = CalibrationConfig::default();
        for field in ConfigField::ALL {
            let Some(text) = self.storage.get(field.storage_key())? else {
                continue;
            };
            match CalibrationConfig::parse_field(field, &text) {
                Ok(parsed) => {
                    loaded.merge(parsed);
                }
                Err(e) => warn!(%field, error = %e, "ignoring unreadable stored value"),
            }
        }

        let fields = self.config.merge(loaded);
        if ctx.is_connected() {
            for field in &fields {
                self.push(ctx, *field);
            }
        }
        info!(?fields, "calibration loaded from storage");
        Ok(fields)
    }

    /// Persist every present field and push it to the service.
    pub fn save(&self, ctx: &ConsoleContext) -> ConsoleResult<Vec<ConfigField>> {
        let fields = self.config.present_fields();
        for field in &fields {
            let text = self.config.field_to_json(*field)?;
            self.storage.set(field.storage_key(), &text)?;
        }
        for field in &fields {
            if let Some(request) = self.config.push_request(*field) {
                ctx.send(request)?;
            }
        }
        info!(?fields, "calibration saved");
        Ok(fields)
    }

    /// Reconcile with a (partial) state received from the service.
    ///
    /// Present fields overwrite the local value. For absent fields the current local
    /// value, if any, is echoed back so the service does not silently stay unset.
    /// Returns the echoed fields.
    pub fn on_remote_update(
        &mut self,
        ctx: &ConsoleContext,
        update: CalibrationConfig,
    ) -> Vec<ConfigField> {
        let absent: Vec<ConfigField> = ConfigField::ALL
            .into_iter()
            .filter(|field| !update.is_present(*field))
            .collect();

        let written = self.config.merge(update);
        debug!(?written, "applied remote calibration");

        let mut echoed = Vec::new();
        for field in absent {
            if self.push(ctx, field) {
                echoed.push(field);
            }
        }
        echoed
    }

    /// Apply values produced by a successful solve. Nothing is echoed.
    pub fn apply_solved(&mut self, update: CalibrationConfig) -> Vec<ConfigField> {
        let written = self.config.merge(update);
        info!(?written, "calibration updated by solve");
        written
    }

    /// Replace `field` with operator-supplied structured text.
    ///
    /// On a parse (or, with strict shapes, validation) failure the previous value
    /// is kept untouched.
    pub fn edit(&mut self, field: ConfigField, raw: &str) -> ConsoleResult<()> {
        let parsed = CalibrationConfig::parse_field(field, raw)
            .map_err(|source| ConsoleError::MalformedConfigEdit { field, source })?;
        if self.strict_shapes {
            parsed.validate_field(field)?;
        }
        self.config.merge(parsed);
        debug!(%field, "calibration field edited");
        Ok(())
    }

    fn push(&self, ctx: &ConsoleContext, field: ConfigField) -> bool {
        let Some(request) = self.config.push_request(field) else {
            return false;
        };
        match ctx.send(request) {
            Ok(()) => true,
            Err(e) => {
                warn!(%field, error = %e, "could not push calibration field");
                false
            }
        }
    }
}
