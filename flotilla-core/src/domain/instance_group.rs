//! Instance group domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Entity, EntityKind, Lifecycle, Stateful};
use crate::status_labels;

/// Boot disk of every instance in a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootDisk {
    pub source_image: String,
    /// Zero keeps the image default
    #[serde(default)]
    pub size_gb: u32,
    #[serde(default)]
    pub disk_type: Option<String>,
}

/// Guest accelerators attached to every instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accelerators {
    pub count: u32,
    #[serde(default)]
    pub accelerator_type: String,
}

/// Instance group configuration carried by a pipeline base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceGroupSpec {
    pub project_id: String,
    pub zone: String,
    pub machine_type: String,
    pub boot_disk: BootDisk,
    #[serde(default)]
    pub accelerators: Accelerators,
    #[serde(default)]
    pub preemptible: bool,
    /// Number of instances while the base is awake
    pub instance_size: u32,
    /// Tokens consumed per running instance
    #[serde(default = "default_token_rate")]
    pub token_rate: i64,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

fn default_token_rate() -> i64 {
    1
}

/// Thresholds below which a constructed group is reported unhealthy
///
/// The defaults accept any group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Fewest instances that must be provisioning, staging or running
    #[serde(default)]
    pub minimum_running_size: u32,
    /// Lowest share of working instances, in percent of all instances
    #[serde(default)]
    pub minimum_running_percentage: u32,
}

impl HealthCheckConfig {
    pub fn accepts(&self, report: &HealthReport) -> bool {
        if report.total == 0 {
            return true;
        }
        report.working >= self.minimum_running_size
            && report.working_percentage() >= self.minimum_running_percentage
    }
}

/// Outcome of the last health check of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub total: u32,
    pub working: u32,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Working instances in percent, rounded up
    pub fn working_percentage(&self) -> u32 {
        if self.total == 0 {
            return 100;
        }
        (self.working * 100).div_ceil(self.total)
    }
}

/// Lifecycle of an instance group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceGroupStatus {
    Constructing,
    ConstructingError,
    Constructed,
    HealthCheckError,
    Resizing,
    Destructing,
    DestructingError,
    Destructed,
}

status_labels!(InstanceGroupStatus {
    Constructing => "constructing",
    ConstructingError => "constructing_error",
    Constructed => "constructed",
    HealthCheckError => "health_check_error",
    Resizing => "resizing",
    Destructing => "destructing",
    DestructingError => "destructing_error",
    Destructed => "destructed",
});

impl Lifecycle for InstanceGroupStatus {
    fn successors(self) -> &'static [Self] {
        use InstanceGroupStatus::*;
        match self {
            Constructing => &[Constructed, ConstructingError],
            ConstructingError => &[Destructing],
            Constructed => &[Resizing, Destructing, HealthCheckError],
            HealthCheckError => &[Constructed, Resizing, Destructing],
            Resizing => &[Constructed],
            Destructing => &[Destructed, DestructingError],
            DestructingError => &[Destructing],
            Destructed => &[],
        }
    }

    fn as_str(self) -> &'static str {
        self.label()
    }
}

impl InstanceGroupStatus {
    /// Holding its size with no operation in flight
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            InstanceGroupStatus::Constructed | InstanceGroupStatus::HealthCheckError
        )
    }
}

/// Cloud compute resource set backing exactly one pipeline base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceGroup {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub pipeline_base_id: Uuid,
    pub name: String,
    pub project_id: String,
    pub zone: String,
    pub machine_type: String,
    pub boot_disk: BootDisk,
    pub accelerators: Accelerators,
    pub preemptible: bool,
    /// Instance count currently provisioned
    pub instance_size: u32,
    /// Instance count asked for by the in-flight operation
    pub instance_size_requested: u32,
    pub startup_script: String,
    pub deployment_name: String,
    pub token_rate: i64,
    /// Tokens consumed while the group keeps its current size
    pub token_consumption: i64,
    pub status: InstanceGroupStatus,
    pub operation_id: Option<Uuid>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub last_health: Option<HealthReport>,
    pub last_error: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceGroup {
    /// Build a new group in `constructing` from a base's configuration
    pub fn from_spec(
        organization_id: Uuid,
        pipeline_base_id: Uuid,
        name: &str,
        spec: &InstanceGroupSpec,
        startup_script: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            pipeline_base_id,
            name: name.to_string(),
            project_id: spec.project_id.clone(),
            zone: spec.zone.clone(),
            machine_type: spec.machine_type.clone(),
            boot_disk: spec.boot_disk.clone(),
            accelerators: spec.accelerators.clone(),
            preemptible: spec.preemptible,
            instance_size: 0,
            instance_size_requested: spec.instance_size,
            startup_script,
            deployment_name: format!("{}-ig", name),
            token_rate: spec.token_rate,
            token_consumption: 0,
            status: InstanceGroupStatus::Constructing,
            operation_id: None,
            health_check: spec.health_check,
            last_health: None,
            last_error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Consumption for a given instance count
    pub fn consumption_for(&self, instance_size: u32) -> i64 {
        (instance_size as i64 * self.token_rate).max(0)
    }

    /// Name of the instance group manager resource inside the deployment
    pub fn manager_name(&self) -> String {
        format!("{}-igm", self.deployment_name)
    }
}

impl Entity for InstanceGroup {
    const KIND: EntityKind = EntityKind::InstanceGroup;

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn parent_id(&self) -> Option<Uuid> {
        Some(self.pipeline_base_id)
    }

    fn status_label(&self) -> Option<&'static str> {
        Some(self.status.label())
    }
}

impl Stateful for InstanceGroup {
    type Status = InstanceGroupStatus;

    fn status(&self) -> InstanceGroupStatus {
        self.status
    }

    fn set_status(&mut self, status: InstanceGroupStatus) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destructed_is_terminal() {
        assert!(InstanceGroupStatus::Destructed.is_terminal());
        for status in InstanceGroupStatus::ALL {
            assert!(!status.can_transition_to(InstanceGroupStatus::Constructing));
        }
    }

    #[test]
    fn test_resize_returns_to_constructed() {
        use InstanceGroupStatus::*;
        assert!(Constructed.can_transition_to(Resizing));
        assert!(Resizing.can_transition_to(Constructed));
        assert!(!Resizing.can_transition_to(Destructing));
    }

    #[test]
    fn test_unhealthy_group_can_recover_or_be_torn_down() {
        use InstanceGroupStatus::*;
        assert!(Constructed.can_transition_to(HealthCheckError));
        assert!(HealthCheckError.can_transition_to(Constructed));
        assert!(HealthCheckError.can_transition_to(Destructing));
        assert!(HealthCheckError.is_settled());
        assert!(!Resizing.is_settled());
    }

    #[test]
    fn test_health_thresholds() {
        let config = HealthCheckConfig {
            minimum_running_size: 2,
            minimum_running_percentage: 50,
        };
        let report = |total, working| HealthReport {
            total,
            working,
            checked_at: Utc::now(),
        };

        assert!(config.accepts(&report(4, 2)));
        assert!(!config.accepts(&report(4, 1)));
        assert!(!config.accepts(&report(5, 2)));
        assert_eq!(report(3, 1).working_percentage(), 34);
        // Nothing provisioned yet is not a failure
        assert!(config.accepts(&report(0, 0)));
        assert!(HealthCheckConfig::default().accepts(&report(3, 0)));
    }

    #[test]
    fn test_status_labels_round_trip() {
        for status in InstanceGroupStatus::ALL {
            assert_eq!(status.label().parse::<InstanceGroupStatus>(), Ok(*status));
        }
        assert!("resize_running".parse::<InstanceGroupStatus>().is_err());
    }

    #[test]
    fn test_consumption_scales_with_size() {
        let spec = InstanceGroupSpec {
            project_id: "proj".to_string(),
            zone: "us-central1-f".to_string(),
            machine_type: "n1-standard-1".to_string(),
            boot_disk: BootDisk {
                source_image: "img".to_string(),
                size_gb: 0,
                disk_type: None,
            },
            accelerators: Accelerators::default(),
            preemptible: false,
            instance_size: 3,
            token_rate: 2,
            health_check: HealthCheckConfig::default(),
        };
        let ig = InstanceGroup::from_spec(Uuid::new_v4(), Uuid::new_v4(), "base", &spec, String::new());

        assert_eq!(ig.consumption_for(3), 6);
        assert_eq!(ig.consumption_for(0), 0);
        assert_eq!(ig.manager_name(), "base-ig-igm");
    }
}
