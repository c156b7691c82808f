//! Deployment payloads
//!
//! Builds the resource requests issued for pipeline bases and instance groups.
//! A base owns a deployment holding its job and progress topics; an instance
//! group owns a deployment holding an instance template and the manager that
//! runs it.

use flotilla_core::domain::instance_group::{BootDisk, InstanceGroup};
use flotilla_core::domain::operation::OperationService;
use flotilla_core::domain::pipeline_base::PipelineBase;
use serde_json::{Value, json};

use super::cloud::ResourceRequest;

/// Seconds a runner has to acknowledge a job message
const JOB_ACK_DEADLINE: u32 = 600;

/// Seconds a consumer has to acknowledge a progress message
const PROGRESS_ACK_DEADLINE: u32 = 30;

const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/devstorage.full_control",
    "https://www.googleapis.com/auth/pubsub",
    "https://www.googleapis.com/auth/logging.write",
    "https://www.googleapis.com/auth/monitoring.write",
    "https://www.googleapis.com/auth/cloud-platform",
];

/// Insert of the base's messaging resources
pub fn base_deployment(base: &PipelineBase) -> ResourceRequest {
    let spec = &base.config.instance_group;
    let mut resources = Vec::new();
    for (topic, subscription, ack_deadline) in [
        (base.job_topic(), base.job_subscription(), JOB_ACK_DEADLINE),
        (
            base.progress_topic(),
            base.progress_subscription(),
            PROGRESS_ACK_DEADLINE,
        ),
    ] {
        resources.push(json!({
            "type": "pubsub.v1.topic",
            "name": topic,
            "properties": { "topic": topic },
        }));
        resources.push(json!({
            "type": "pubsub.v1.subscription",
            "name": subscription,
            "properties": {
                "subscription": subscription,
                "topic": format!("$(ref.{}.name)", topic),
                "ackDeadlineSeconds": ack_deadline,
            },
        }));
    }

    ResourceRequest {
        service: OperationService::Deploymentmanager,
        project_id: spec.project_id.clone(),
        zone: spec.zone.clone(),
        name: base.deployment_name.clone(),
        body: deployment_body(&base.deployment_name, resources),
    }
}

/// Insert of an instance group's template and manager
pub fn instance_group_deployment(ig: &InstanceGroup) -> ResourceRequest {
    let template_name = format!("{}-it", ig.deployment_name);
    let resources = vec![
        json!({
            "type": "compute.v1.instanceTemplate",
            "name": template_name,
            "properties": {
                "zone": ig.zone,
                "properties": template_properties(ig),
            },
        }),
        json!({
            "type": "compute.v1.instanceGroupManagers",
            "name": ig.manager_name(),
            "properties": {
                "baseInstanceName": format!("{}-instance", ig.deployment_name),
                "instanceTemplate": format!("$(ref.{}.selfLink)", template_name),
                "targetSize": ig.instance_size_requested,
                "zone": ig.zone,
            },
        }),
    ];

    ResourceRequest {
        service: OperationService::Deploymentmanager,
        project_id: ig.project_id.clone(),
        zone: ig.zone.clone(),
        name: ig.deployment_name.clone(),
        body: deployment_body(&ig.deployment_name, resources),
    }
}

/// Update of the instance group manager's target size
pub fn resize_request(ig: &InstanceGroup, instance_size: u32) -> ResourceRequest {
    ResourceRequest {
        service: OperationService::Compute,
        project_id: ig.project_id.clone(),
        zone: ig.zone.clone(),
        name: ig.manager_name(),
        body: json!({ "targetSize": instance_size }),
    }
}

/// Delete of a whole deployment
pub fn delete_deployment(project_id: &str, zone: &str, name: &str) -> ResourceRequest {
    ResourceRequest {
        service: OperationService::Deploymentmanager,
        project_id: project_id.to_string(),
        zone: zone.to_string(),
        name: name.to_string(),
        body: Value::Null,
    }
}

fn deployment_body(name: &str, resources: Vec<Value>) -> Value {
    let content = json!({ "resources": resources }).to_string();
    json!({
        "name": name,
        "target": { "config": { "content": content } },
    })
}

fn template_properties(ig: &InstanceGroup) -> Value {
    let mut scheduling = json!({ "preemptible": ig.preemptible });
    let mut properties = json!({
        "machineType": ig.machine_type,
        "metadata": {
            "items": [{ "key": "startup-script", "value": ig.startup_script }],
        },
        "networkInterfaces": [{
            "network": format!(
                "https://www.googleapis.com/compute/v1/projects/{}/global/networks/default",
                ig.project_id
            ),
            "accessConfigs": [{ "name": "External-IP", "type": "ONE_TO_ONE_NAT" }],
        }],
        "serviceAccounts": [{ "scopes": SCOPES }],
        "disks": [boot_disk(&ig.boot_disk)],
    });

    if ig.accelerators.count > 0 {
        scheduling["onHostMaintenance"] = json!("TERMINATE");
        properties["guestAccelerators"] = json!([{
            "acceleratorCount": ig.accelerators.count,
            "acceleratorType": ig.accelerators.accelerator_type,
        }]);
    }
    properties["scheduling"] = scheduling;
    properties
}

fn boot_disk(disk: &BootDisk) -> Value {
    let mut params = json!({ "sourceImage": disk.source_image });
    if disk.size_gb > 0 {
        params["diskSizeGb"] = json!(disk.size_gb);
    }
    if let Some(disk_type) = &disk.disk_type {
        params["diskType"] = json!(disk_type);
    }
    json!({
        "deviceName": "boot",
        "type": "PERSISTENT",
        "boot": true,
        "autoDelete": true,
        "initializeParams": params,
    })
}
