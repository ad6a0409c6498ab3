//! Drift classification.

/// Result of comparing a container's current address with the stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftResult {
    /// The container reports no address; it is skipped this pass.
    NoAddress,

    /// Nothing is stored (or the record expired). Not drift: the caller
    /// records the address without remediating.
    FirstSighting { current: String },

    /// Stored and current addresses match.
    Unchanged { address: String },

    /// The address moved since it was last committed.
    Drifted { previous: String, current: String },
}

impl DriftResult {
    /// Classify a container given its current and stored address.
    ///
    /// Blank strings count as absent on both sides.
    pub fn classify(current: Option<&str>, stored: Option<&str>) -> Self {
        let Some(current) = current.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::NoAddress;
        };

        match stored.map(str::trim).filter(|s| !s.is_empty()) {
            None => Self::FirstSighting {
                current: current.to_string(),
            },
            Some(stored) if stored == current => Self::Unchanged {
                address: current.to_string(),
            },
            Some(stored) => Self::Drifted {
                previous: stored.to_string(),
                current: current.to_string(),
            },
        }
    }

    /// Returns true if remediation is required.
    pub fn is_drifted(&self) -> bool {
        matches!(self, Self::Drifted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_address_wins_over_stored() {
        assert_eq!(
            DriftResult::classify(None, Some("10.0.0.5")),
            DriftResult::NoAddress
        );
        assert_eq!(DriftResult::classify(Some(""), None), DriftResult::NoAddress);
    }

    #[test]
    fn test_first_sighting() {
        assert_eq!(
            DriftResult::classify(Some("10.0.0.9"), None),
            DriftResult::FirstSighting {
                current: "10.0.0.9".to_string()
            }
        );
    }

    #[test]
    fn test_unchanged_and_drifted() {
        let unchanged = DriftResult::classify(Some("10.0.0.5"), Some("10.0.0.5"));
        assert!(!unchanged.is_drifted());

        let drifted = DriftResult::classify(Some("10.0.0.9"), Some("10.0.0.5"));
        assert!(drifted.is_drifted());
        assert_eq!(
            drifted,
            DriftResult::Drifted {
                previous: "10.0.0.5".to_string(),
                current: "10.0.0.9".to_string(),
            }
        );
    }
}
