//! Error hints: mapping from error variants to user-facing remediation suggestions.
//!
//! Each error variant maps to a one-line summary, zero to two actionable
//! hints, and the context fields worth printing alongside the error.
//! Hints are static strings so they stay stable under test.

use crate::error::Error;
use std::fmt::Write as _;

/// A remediation hint for an error.
#[derive(Debug, Clone)]
pub struct ErrorHint {
    /// Brief 1-line summary of the error category.
    pub summary: &'static str,
    /// Actionable hints for the user (0-2 items).
    pub hints: &'static [&'static str],
    /// Context fields that should be displayed with the error.
    pub context_fields: &'static [&'static str],
}

/// Get remediation hints for an error variant.
pub fn hints_for_error(error: &Error) -> ErrorHint {
    match error {
        Error::MissingPrompt => ErrorHint {
            summary: "No prompt in the test",
            hints: &["Add at least one prompt to the suite's \"prompts\" field"],
            context_fields: &[],
        },
        Error::InconsistentCases { .. } => ErrorHint {
            summary: "Test cases use different variables",
            hints: &["Give every case the same set of variable names"],
            context_fields: &["expected", "found"],
        },
        Error::InvalidRuns(_) => ErrorHint {
            summary: "Run count must be a positive integer",
            hints: &["Set \"runs\" to a whole number such as 10"],
            context_fields: &[],
        },
        Error::FileNotFound { .. } => ErrorHint {
            summary: "Test snapshot not found",
            hints: &[
                "Pass a test id from the cache directory or a path to a .json/.csv file",
                "Check --cache-dir or THUMB_CACHE_DIR points at the right directory",
            ],
            context_fields: &["path"],
        },
        Error::BadFileType { .. } => ErrorHint {
            summary: "Unsupported snapshot format",
            hints: &["Only .json and .csv snapshots can be loaded"],
            context_fields: &["path"],
        },
        Error::RunNotFound { .. } => ErrorHint {
            summary: "No such run in this test",
            hints: &["Use 'thumb pending <test>' to list runs awaiting feedback"],
            context_fields: &["prompt_id", "case_id", "model_id", "run_id"],
        },
        Error::Config(msg) => config_hints(msg),
        Error::Provider { message, .. } => provider_hints(message),
        Error::Validation(msg) => validation_hints(msg),
        Error::Io(err) => io_hints(err),
        Error::Json(err) => json_hints(err),
        Error::Csv(_) => ErrorHint {
            summary: "Malformed CSV snapshot",
            hints: &["The header must match the columns written by 'thumb export'"],
            context_fields: &["line"],
        },
    }
}

fn config_hints(msg: &str) -> ErrorHint {
    if msg.contains("settings") {
        return ErrorHint {
            summary: "Invalid or missing configuration file",
            hints: &[
                "Check that ~/.thumb/settings.json and .thumb/settings.json are valid JSON",
                "Set THUMB_CONFIG_PATH to use a specific settings file",
            ],
            context_fields: &["file_path"],
        };
    }
    ErrorHint {
        summary: "Configuration error",
        hints: &["Check configuration file syntax and required fields"],
        context_fields: &[],
    }
}

fn provider_hints(message: &str) -> ErrorHint {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        return ErrorHint {
            summary: "Rate limited by the model provider",
            hints: &[
                "Lower batchSize in settings to send fewer concurrent requests",
                "Set asyncGenerate to false to generate one request at a time",
            ],
            context_fields: &["provider"],
        };
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return ErrorHint {
            summary: "Model request timed out",
            hints: &["Retry; completed runs are already saved and will be skipped"],
            context_fields: &["provider"],
        };
    }
    ErrorHint {
        summary: "Model provider error",
        hints: &["Check the provider's status and your credentials"],
        context_fields: &["provider"],
    }
}

fn validation_hints(msg: &str) -> ErrorHint {
    if msg.contains("feedback") {
        return ErrorHint {
            summary: "Unrecognized feedback",
            hints: &["Use the configured labels, or up/down, 1/0, +/-"],
            context_fields: &[],
        };
    }
    ErrorHint {
        summary: "Validation failed",
        hints: &["Check the input against the expected format"],
        context_fields: &[],
    }
}

fn io_hints(err: &std::io::Error) -> ErrorHint {
    match err.kind() {
        std::io::ErrorKind::NotFound => ErrorHint {
            summary: "File or directory not found",
            hints: &["Verify the path exists"],
            context_fields: &["path"],
        },
        std::io::ErrorKind::PermissionDenied => ErrorHint {
            summary: "Permission denied",
            hints: &["Check permissions on the cache directory"],
            context_fields: &["path"],
        },
        _ => ErrorHint {
            summary: "I/O error",
            hints: &["Check file system and permissions"],
            context_fields: &["path"],
        },
    }
}

fn json_hints(err: &serde_json::Error) -> ErrorHint {
    if err.is_syntax() {
        return ErrorHint {
            summary: "Invalid JSON syntax",
            hints: &["Check for missing commas, brackets, or quotes"],
            context_fields: &["line", "column"],
        };
    }
    if err.is_data() {
        return ErrorHint {
            summary: "JSON data does not match expected structure",
            hints: &["Snapshots need data, prompts, cases, models and runs fields"],
            context_fields: &["field_path"],
        };
    }
    ErrorHint {
        summary: "JSON error",
        hints: &[],
        context_fields: &[],
    }
}

/// Format an error with its summary and suggestions for terminal output.
pub fn format_error_with_hints(error: &Error) -> String {
    let hint = hints_for_error(error);
    let mut output = String::new();

    let _ = writeln!(&mut output, "Error: {error}");

    // Summary if different from error message
    if !error.to_string().contains(hint.summary) {
        output.push('\n');
        output.push_str(hint.summary);
        output.push('\n');
    }

    if !hint.hints.is_empty() {
        output.push_str("\nSuggestions:\n");
        for &h in hint.hints {
            let _ = writeln!(&mut output, "  • {h}");
        }
    }

    output
}
