use crate::problem::{ConstraintSet, DurationValue, LocationKind, Topology};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be non-negative, got {value}")]
    NegativeTime {
        field: &'static str,
        value: DurationValue,
    },
    #[error("{field} must be at least 1")]
    ZeroCapacity { field: &'static str },
    #[error("location {name:?}: {reason}")]
    BadLocation { name: String, reason: String },
}

/// Checked once, before any simulation work. Invalid configuration is fatal,
/// never clamped.
pub fn validate(constraints: &ConstraintSet) -> Result<(), ConfigError> {
    let times = [
        ("minimum headway", constraints.min_headway),
        ("minimum occupation time", constraints.min_occupation),
        ("dwell time", constraints.dwell_time),
        ("max allowed delay", constraints.max_allowed_delay),
    ];
    for (field, value) in times {
        if value < 0 {
            return Err(ConfigError::NegativeTime { field, value });
        }
    }
    if constraints.block_capacity < 1 {
        return Err(ConfigError::ZeroCapacity {
            field: "block capacity",
        });
    }
    if constraints.platform_capacity < 1 {
        return Err(ConfigError::ZeroCapacity {
            field: "platform capacity",
        });
    }
    Ok(())
}

/// Structural checks on per-location overrides and references.
pub fn validate_topology(topology: &Topology) -> Result<(), ConfigError> {
    let n = topology.locations.len();
    for location in topology.locations.iter() {
        if location.capacity == Some(0) {
            return Err(ConfigError::BadLocation {
                name: location.name.clone(),
                reason: "capacity override must be at least 1".to_string(),
            });
        }
        for (field, value) in [
            ("headway", location.min_headway),
            ("occupation time", location.min_occupation),
        ] {
            if let Some(value) = value {
                if value < 0 {
                    return Err(ConfigError::BadLocation {
                        name: location.name.clone(),
                        reason: format!("{} override must be non-negative", field),
                    });
                }
            }
        }
        if let LocationKind::Platform { block } = location.kind {
            if usize::from(block) >= n {
                return Err(ConfigError::BadLocation {
                    name: location.name.clone(),
                    reason: "platform references an unknown block".to_string(),
                });
            }
        }
        for alt in &location.alternates {
            if usize::from(*alt) >= n {
                return Err(ConfigError::BadLocation {
                    name: location.name.clone(),
                    reason: "alternate references an unknown location".to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Location;

    #[test]
    pub fn default_constraints_are_valid() {
        assert!(validate(&ConstraintSet::default()).is_ok());
    }

    #[test]
    pub fn rejects_out_of_range_values() {
        let cases = [
            ConstraintSet {
                min_headway: -1,
                ..ConstraintSet::default()
            },
            ConstraintSet {
                dwell_time: -30,
                ..ConstraintSet::default()
            },
            ConstraintSet {
                max_allowed_delay: -1,
                ..ConstraintSet::default()
            },
            ConstraintSet {
                block_capacity: 0,
                ..ConstraintSet::default()
            },
            ConstraintSet {
                platform_capacity: 0,
                ..ConstraintSet::default()
            },
        ];
        for constraints in cases {
            assert!(validate(&constraints).is_err(), "{:?}", constraints);
        }
    }

    #[test]
    pub fn rejects_bad_location_overrides() {
        let mut topology = Topology::new();
        let mut bad = Location::block("B1");
        bad.capacity = Some(0);
        topology.add(bad);
        assert!(matches!(
            validate_topology(&topology),
            Err(ConfigError::BadLocation { .. })
        ));

        let mut topology = Topology::new();
        let b1 = topology.add(Location::block("B1"));
        let mut with_alt = Location::block("B2");
        with_alt.alternates.push(crate::problem::LocationId(9));
        topology.add(with_alt);
        let _ = b1;
        assert!(validate_topology(&topology).is_err());
    }
}
