//! Classification of ffmpeg failures from its diagnostic output.

use serde::Serialize;

/// Signal the kernel OOM killer delivers.
const SIGKILL: i32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    CorruptedInput,
    MissingFile,
    PermissionDenied,
    UnsupportedCodec,
    FilterConfiguration,
    StorageExhausted,
    OutOfMemory,
    InvalidParameters,
    Unknown,
}

/// Ordered so that the most specific symptom wins when several match.
const PATTERNS: &[(FailureClass, &[&str])] = &[
    (
        FailureClass::OutOfMemory,
        &["cannot allocate memory", "out of memory", "killed"],
    ),
    (
        FailureClass::StorageExhausted,
        &["no space left on device", "disk quota exceeded", "file too large"],
    ),
    (
        FailureClass::PermissionDenied,
        &["permission denied", "operation not permitted"],
    ),
    (FailureClass::MissingFile, &["no such file or directory"]),
    (
        FailureClass::CorruptedInput,
        &[
            "invalid data found when processing input",
            "moov atom not found",
            "error while decoding",
            "corrupt",
            "truncated",
        ],
    ),
    (
        FailureClass::UnsupportedCodec,
        &[
            "decoder not found",
            "unknown decoder",
            "encoder not found",
            "unknown encoder",
            "codec not currently supported",
            "could not find codec parameters",
        ],
    ),
    (
        FailureClass::FilterConfiguration,
        &[
            "error initializing complex filters",
            "error reinitializing filters",
            "error configuring",
            "no such filter",
            "matches no streams",
            "failed to configure",
            "filtergraph",
        ],
    ),
    (
        FailureClass::InvalidParameters,
        &[
            "invalid argument",
            "unrecognized option",
            "option not found",
            "error parsing",
            "invalid value",
        ],
    ),
];

impl FailureClass {
    /// Picks a class from captured stderr and, on unix, the terminating signal.
    pub fn classify(stderr: &str, signal: Option<i32>) -> Self {
        if signal == Some(SIGKILL) {
            return FailureClass::OutOfMemory;
        }

        let haystack = stderr.to_lowercase();
        PATTERNS
            .iter()
            .find(|(_, needles)| needles.iter().any(|needle| haystack.contains(needle)))
            .map(|(class, _)| *class)
            .unwrap_or(FailureClass::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::CorruptedInput => "corrupted_input",
            FailureClass::MissingFile => "missing_file",
            FailureClass::PermissionDenied => "permission_denied",
            FailureClass::UnsupportedCodec => "unsupported_codec",
            FailureClass::FilterConfiguration => "filter_configuration",
            FailureClass::StorageExhausted => "storage_exhausted",
            FailureClass::OutOfMemory => "out_of_memory",
            FailureClass::InvalidParameters => "invalid_parameters",
            FailureClass::Unknown => "unknown",
        }
    }

    /// Message shown to the person who requested the export.
    pub fn user_message(self) -> &'static str {
        match self {
            FailureClass::CorruptedInput => {
                "One of the media files is corrupted or incomplete. Try re-uploading it."
            }
            FailureClass::MissingFile => "A media file disappeared before rendering finished.",
            FailureClass::PermissionDenied => {
                "The renderer was not allowed to read or write a required file."
            }
            FailureClass::UnsupportedCodec => {
                "One of the media files uses a format that is not supported."
            }
            FailureClass::FilterConfiguration => {
                "The timeline could not be turned into a valid render. Check transitions, crops and text."
            }
            FailureClass::StorageExhausted => "The render server ran out of disk space.",
            FailureClass::OutOfMemory => {
                "The render ran out of memory. Try a lower resolution or a shorter timeline."
            }
            FailureClass::InvalidParameters => "The export settings were rejected by the encoder.",
            FailureClass::Unknown => "Rendering failed for an unknown reason.",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
