//! Keyword options for the coupling fix.
//!
//! This module provides the `FixOptions` struct, which is filled from the
//! keyword list the host simulator hands the plug-in on its command line.
//! Two keywords are understood: `maxdelay` (per-request response budget in
//! milliseconds) and `every` (interchange stride in integration steps).
//! Anything else fails fast with a diagnostic naming the keyword.

use crate::error::LinkError;

/// Coupling fix parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FixOptions {
    /// Response budget per request, in milliseconds. Zero means no deadline:
    /// the worker polls indefinitely with back-off.
    pub max_delay_ms: f64,

    /// Interchange once every this many integration steps.
    pub every: u32,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self { max_delay_ms: 0.0, every: 1 }
    }
}

impl FixOptions {
    /// Parse the plug-in keyword list, e.g. `["maxdelay", "50", "every", "10"]`.
    pub fn parse(args: &[&str]) -> Result<Self, LinkError> {
        let mut options = Self::default();
        let mut i = 0;
        while i < args.len() {
            match args[i] {
                "maxdelay" => {
                    let value = args.get(i + 1).ok_or_else(|| {
                        LinkError::BadArgument("missing argument for `maxdelay'".into())
                    })?;
                    options.max_delay_ms = value.parse().map_err(|_| {
                        LinkError::BadArgument(format!("invalid `maxdelay' value `{value}'"))
                    })?;
                    if options.max_delay_ms < 0.0 {
                        return Err(LinkError::BadArgument(format!(
                            "`maxdelay' must be non-negative, got `{value}'"
                        )));
                    }
                    i += 2;
                }
                "every" => {
                    let value = args.get(i + 1).ok_or_else(|| {
                        LinkError::BadArgument("missing argument for `every'".into())
                    })?;
                    options.every = value.parse().map_err(|_| {
                        LinkError::BadArgument(format!("invalid `every' value `{value}'"))
                    })?;
                    if options.every == 0 {
                        return Err(LinkError::BadArgument("`every' must be positive".into()));
                    }
                    i += 2;
                }
                other => {
                    return Err(LinkError::BadArgument(format!("unknown keyword `{other}'")));
                }
            }
        }
        Ok(options)
    }
}
