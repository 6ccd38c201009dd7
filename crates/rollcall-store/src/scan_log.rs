use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a person was presented at the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Qr,
    Face,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qr => "qr",
            Self::Face => "face",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qr" => Ok(Self::Qr),
            "face" => Ok(Self::Face),
            other => Err(format!("unknown scan type: {other}")),
        }
    }
}

/// A scan to be appended to the log.
#[derive(Debug, Clone)]
pub struct NewScanLog {
    pub scanner_email: String,
    pub scan_type: ScanType,
    pub matched_name: Option<String>,
    pub matched_email: Option<String>,
}

/// A persisted scan log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanLogEntry {
    pub id: i64,
    pub scanner_email: String,
    pub scan_type: ScanType,
    pub matched_name: Option<String>,
    pub matched_email: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_type_string_forms_agree() {
        for t in [ScanType::Qr, ScanType::Face] {
            assert_eq!(t.as_str().parse::<ScanType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{t}\""));
        }
        assert!("badge".parse::<ScanType>().is_err());
    }
}
