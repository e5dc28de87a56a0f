use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Storage driver types
///
/// Defined in core because configuration needs it without pulling in the
/// backend clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Local,
    S3,
    R2,
    Spaces,
}

impl DriverKind {
    /// Whether this driver talks to an S3-compatible object store.
    pub fn is_cloud(&self) -> bool {
        !matches!(self, DriverKind::Local)
    }
}

impl FromStr for DriverKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(DriverKind::Local),
            "s3" => Ok(DriverKind::S3),
            "r2" => Ok(DriverKind::R2),
            "spaces" => Ok(DriverKind::Spaces),
            _ => Err(anyhow::anyhow!("Invalid storage driver: {}", s)),
        }
    }
}

impl Display for DriverKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DriverKind::Local => write!(f, "local"),
            DriverKind::S3 => write!(f, "s3"),
            DriverKind::R2 => write!(f, "r2"),
            DriverKind::Spaces => write!(f, "spaces"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("S3".parse::<DriverKind>().unwrap(), DriverKind::S3);
        assert_eq!(" spaces ".parse::<DriverKind>().unwrap(), DriverKind::Spaces);
        assert!("nfs".parse::<DriverKind>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_serde_name() {
        let json = serde_json::to_string(&DriverKind::R2).unwrap();
        assert_eq!(json, format!("\"{}\"", DriverKind::R2));
        assert!(!DriverKind::Local.is_cloud());
        assert!(DriverKind::R2.is_cloud());
    }
}
