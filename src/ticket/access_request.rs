//! Access request, group change and designer payloads carried by multi fields

use std::fmt;

use serde::{Deserialize, Serialize};

/// Risk analysis status for an access request without violations
pub const NO_RISK: &str = "no risk";
const HAS_RISK: &str = "has risk";
const IMPLEMENTED: &str = "implemented";

/// Designer status reported when no suggestion could be computed
pub const DESIGNER_CANNOT_COMPUTE: &str = "DESIGNER_CANNOT_COMPUTE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub order: String,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub sources: Vec<NetworkObject>,
    #[serde(default)]
    pub destinations: Vec<NetworkObject>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub risk_analysis_result: RiskAnalysisResult,
    #[serde(default)]
    pub verifier_result: Option<VerifierResult>,
}

impl AccessRequest {
    pub fn to_pretty_string(&self) -> String {
        let join = |items: &[NetworkObject]| {
            items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let targets = self
            .targets
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        let mut out = format!("Access Request {}:\n", self.order);
        out.push_str(&format!("  Targets: {targets}\n"));
        out.push_str(&format!("  Sources: {}\n", join(&self.sources)));
        out.push_str(&format!("  Destinations: {}\n", join(&self.destinations)));
        out.push_str(&format!("  Services: {}\n", self.services.join(", ")));
        out.push_str(&format!(
            "  Action: {}",
            self.action.as_deref().unwrap_or("accept")
        ));
        out
    }

    pub fn is_verified_implemented(&self) -> bool {
        self.verifier_result
            .as_ref()
            .is_some_and(VerifierResult::is_implemented)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Target {
    Any,
    Object {
        #[serde(default)]
        management_name: Option<String>,
        object_name: String,
    },
}

impl Target {
    /// `management/object`, or just the object name when both match
    pub fn display_name(&self) -> String {
        match self {
            Target::Any => "Any".to_string(),
            Target::Object {
                management_name: Some(management),
                object_name,
            } if management != object_name => format!("{management}/{object_name}"),
            Target::Object { object_name, .. } => object_name.clone(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkObject {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl fmt::Display for NetworkObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.address) {
            (Some(name), Some(address)) => write!(f, "{name} ({address})"),
            (Some(name), None) => f.write_str(name),
            (None, Some(address)) => f.write_str(address),
            (None, None) => f.write_str("Any"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperlink {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupChange {
    pub name: String,
    #[serde(default)]
    pub management_name: Option<String>,
    #[serde(default)]
    pub members: Vec<GroupMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub name: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub status: String,
}

impl GroupChange {
    pub fn to_pretty_string(&self) -> String {
        let mut out = match &self.management_name {
            Some(management) => format!("Group {} on {}:", self.name, management),
            None => format!("Group {}:", self.name),
        };
        for member in &self.members {
            out.push_str(&format!("\n  {} {}", member.status, member.name));
            if let Some(details) = &member.details {
                out.push_str(&format!(" ({details})"));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAnalysisResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub security_policy_violations: Vec<SecurityPolicyViolation>,
}

impl RiskAnalysisResult {
    pub fn has_risk(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case(HAS_RISK)
    }

    pub fn is_no_risk(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case(NO_RISK)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicyViolation {
    pub severity: String,
    pub security_zone_matrix: SecurityZoneMatrix,
    pub matrix_cell_violation: MatrixCellViolation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityZoneMatrix {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixCellViolation {
    pub from_zone: String,
    pub to_zone: String,
    #[serde(default)]
    pub sources: Vec<ViolationResource>,
    #[serde(default)]
    pub destinations: Vec<ViolationResource>,
    #[serde(default)]
    pub services: CellServices,
}

/// What the zone matrix cell allows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CellServices {
    Restricted {
        #[serde(default)]
        allowed_services: Vec<ViolationResource>,
        #[serde(default)]
        not_allowed_services: Vec<ViolationResource>,
    },
    BlockedOnly {
        #[serde(default)]
        blocked_services: Vec<ViolationResource>,
        #[serde(default)]
        not_blocked_services: Vec<ViolationResource>,
    },
    #[default]
    #[serde(other)]
    BlockAll,
}

impl CellServices {
    /// (allowed services, violating services) as display strings
    pub fn describe(&self) -> (String, String) {
        match self {
            CellServices::Restricted {
                allowed_services,
                not_allowed_services,
            } => (
                ViolationResource::join(allowed_services),
                ViolationResource::join(not_allowed_services),
            ),
            CellServices::BlockedOnly {
                blocked_services,
                not_blocked_services,
            } => (
                ViolationResource::join(blocked_services),
                ViolationResource::join(not_blocked_services),
            ),
            CellServices::BlockAll => ("Block All".to_string(), "All services".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViolationResource {
    Any,
    Group { group_member_path: String },
    Object { name: String },
}

impl ViolationResource {
    pub fn label(&self) -> &str {
        match self {
            ViolationResource::Any => "Any",
            ViolationResource::Group { group_member_path } => group_member_path,
            ViolationResource::Object { name } => name,
        }
    }

    pub fn join(resources: &[ViolationResource]) -> String {
        resources
            .iter()
            .map(ViolationResource::label)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierResult {
    pub status: String,
}

impl VerifierResult {
    pub fn is_implemented(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case(IMPLEMENTED)
    }
}

/// Designer status embedded in a multi access request field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignerSummary {
    pub status: String,
}

impl DesignerSummary {
    pub fn cannot_compute(&self) -> bool {
        self.status.eq_ignore_ascii_case(DESIGNER_CANNOT_COMPUTE)
    }
}

/// Full designer results fetched from the platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignerResults {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub device_suggestions: Vec<DeviceSuggestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSuggestion {
    pub management_id: u64,
    #[serde(default)]
    pub management_name: String,
    #[serde(default)]
    pub change_implementation_status: String,
}

impl DesignerResults {
    pub fn is_implemented(&self) -> bool {
        self.device_suggestions
            .iter()
            .all(|d| d.change_implementation_status.eq_ignore_ascii_case(IMPLEMENTED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_display_name() {
        let same = Target::Object {
            management_name: Some("fw1".to_string()),
            object_name: "fw1".to_string(),
        };
        assert_eq!(same.display_name(), "fw1");

        let nested = Target::Object {
            management_name: Some("cma".to_string()),
            object_name: "fw2".to_string(),
        };
        assert_eq!(nested.display_name(), "cma/fw2");
        assert_eq!(Target::Any.display_name(), "Any");
    }

    #[test]
    fn test_cell_services_default_is_block_all() {
        let cell: MatrixCellViolation = serde_json::from_value(json!({
            "from_zone": "dmz",
            "to_zone": "internal",
            "sources": [{"type": "any"}],
            "destinations": [{"type": "object", "name": "db01"}]
        }))
        .unwrap();
        assert_eq!(cell.services, CellServices::BlockAll);
        assert_eq!(
            cell.services.describe(),
            ("Block All".to_string(), "All services".to_string())
        );
        assert_eq!(ViolationResource::join(&cell.sources), "Any");
        assert_eq!(ViolationResource::join(&cell.destinations), "db01");
    }

    #[test]
    fn test_designer_results_implemented() {
        let results = DesignerResults {
            status: "done".to_string(),
            device_suggestions: vec![DeviceSuggestion {
                management_id: 3,
                management_name: "fw".to_string(),
                change_implementation_status: "IMPLEMENTED".to_string(),
            }],
        };
        assert!(results.is_implemented());
    }

    #[test]
    fn test_access_request_pretty_string() {
        let ar = AccessRequest {
            order: "AR1".to_string(),
            targets: vec![Target::Any],
            sources: vec![NetworkObject {
                name: Some("web".to_string()),
                address: Some("10.0.0.1".to_string()),
            }],
            destinations: vec![],
            services: vec!["tcp 443".to_string()],
            action: None,
            risk_analysis_result: RiskAnalysisResult::default(),
            verifier_result: None,
        };
        let text = ar.to_pretty_string();
        assert!(text.starts_with("Access Request AR1:"));
        assert!(text.contains("Sources: web (10.0.0.1)"));
        assert!(text.contains("Services: tcp 443"));
    }
}
