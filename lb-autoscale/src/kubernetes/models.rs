use std::fmt;

// Read by the DigitalOcean cloud controller to size the load balancer behind a Service.
pub const SIZE_UNIT_ANNOTATION: &str = "service.beta.kubernetes.io/do-loadbalancer-size-unit";

/// Current value of the size-unit annotation, as read before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationState {
    pub key: &'static str,
    pub value: String,
}

impl AnnotationState {
    pub fn matches(&self, desired_size: u32) -> bool {
        self.value == desired_size.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The annotation already held the desired value; nothing was written.
    Unchanged { value: String },
    Updated { name: String, value: String },
    /// The API server refused the patch. The decision stands but was not applied.
    Rejected { reason: String },
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Unchanged { value } => {
                write!(f, "unchanged: size unit already {value}")
            }
            UpdateOutcome::Updated { name, value } => {
                write!(f, "updated: service {name} size unit set to {value}")
            }
            UpdateOutcome::Rejected { reason } => write!(f, "not applied: {reason}"),
        }
    }
}
