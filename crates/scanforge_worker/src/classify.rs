//! Pure mapping from a raw scan error to its stable [`ErrorCategory`].
//!
//! Classification happens once, at the lowest layer that produces the
//! error — a sandbox runtime failure classifies itself as it surfaces the
//! error, a proxy client classifies its own timeouts. This module's job is
//! then a pure pass-through for anything pre-classified, falling back to
//! marker matching only for errors that reach it unclassified (chiefly
//! analyzer stderr/stdout text the sandbox can't interpret itself).

use scanforge_protocol::ErrorCategory;

/// Markers are matched in order; the first match wins. A marker list this
/// small only works because it's curated against the exact phrasing the Go
/// toolchain and module proxy are known to emit. The local-replace-without-
/// go.mod check sits between `-mod=vendor` and "temporarily unavailable"
/// because it needs a compound predicate rather than a single substring.
const MARKERS_BEFORE_LOCAL_REPLACE: &[(&str, ErrorCategory)] = &[
    ("no modules specified", ErrorCategory::BadModule),
    ("too many open files", ErrorCategory::ScanTooManyFiles),
    ("no required module", ErrorCategory::LoadNoRequiredModule),
    ("missing go.sum entry", ErrorCategory::LoadMissingGoSumEntry),
    ("-mod=vendor", ErrorCategory::LoadVendor),
];

const MARKERS_AFTER_LOCAL_REPLACE: &[(&str, ErrorCategory)] = &[
    ("temporarily unavailable", ErrorCategory::ProxyTimeout),
    ("exit status 137", ErrorCategory::ScanSandboxError),
    ("does not contain package", ErrorCategory::BadModule),
    ("but was required", ErrorCategory::LoadNoRequiredModule),
    (
        "relative import paths are not supported in module mode",
        ErrorCategory::LoadImportedLocal,
    ),
    ("no go.mod file", ErrorCategory::LoadNoGoMod),
];

fn is_local_replace_without_gomod(message: &str) -> bool {
    (message.contains("replaced by ./") || message.contains("replaced by ../"))
        && message.contains("go.mod: no such file")
}

/// Classify a raw error message. `already_classified` lets an upstream
/// producer (e.g. the sandbox runtime recognizing its own exit code) skip
/// marker matching entirely — this function then just returns it
/// unchanged. `synthetic_module`, when set, is the placeholder module name
/// the init step used; any error mentioning it is a synthetic-module
/// error regardless of its wording.
pub fn classify(
    message: &str,
    already_classified: Option<ErrorCategory>,
    synthetic_module: Option<&str>,
) -> ErrorCategory {
    if let Some(category) = already_classified {
        return category;
    }

    if let Some(name) = synthetic_module {
        if !name.is_empty() && message.contains(name) {
            return ErrorCategory::ScanSynthetic;
        }
    }

    for (marker, category) in MARKERS_BEFORE_LOCAL_REPLACE {
        if message.contains(marker) {
            return *category;
        }
    }

    if is_local_replace_without_gomod(message) {
        return ErrorCategory::LoadImportedLocal;
    }

    for (marker, category) in MARKERS_AFTER_LOCAL_REPLACE {
        if message.contains(marker) {
            return *category;
        }
    }

    ErrorCategory::Misc
}
