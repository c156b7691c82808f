//! Instance startup script
//!
//! Every instance of a base's group pulls the container image and starts the
//! configured number of containers, each subscribed to the base's job topic.

use flotilla_core::domain::pipeline_base::PipelineBase;

/// Shell helper retrying a command with exponential backoff
const BACKOFF_HELPER: &str = r#"function with_backoff {
  local max_attempts=${ATTEMPTS-5}
  local interval=${INITIAL_INTERVAL-1}
  local attempt=0
  local code=0
  while (( attempt < max_attempts )); do
    set +e
    "$@"
    code=$?
    set -e
    if [[ $code == 0 ]]; then
      break
    fi
    echo "retrying in $interval: $*" 1>&2
    sleep $interval
    attempt=$(( attempt + 1 ))
    interval=$(( interval * 2 ))
  done
  return $code
}"#;

const GPU_RUNTIME_SETUP: &str = r#"if ! command -v nvidia-docker > /dev/null; then
  distribution=$(. /etc/os-release; echo $ID$VERSION_ID)
  curl -s -L https://nvidia.github.io/nvidia-docker/gpgkey | apt-key add -
  curl -s -L https://nvidia.github.io/nvidia-docker/$distribution/nvidia-docker.list > /etc/apt/sources.list.d/nvidia-docker.list
  apt-get update
  apt-get install -y nvidia-docker2
  pkill -SIGHUP dockerd
fi"#;

const STACKDRIVER_AGENT: &str =
    "docker run -d -e MONITOR_HOST=true -v /proc:/mnt/proc:ro --privileged wikiwi/stackdriver-agent";

/// Build the startup script for a base's instances
pub fn build(base: &PipelineBase) -> String {
    let spec = &base.config.instance_group;
    let container = &base.config.container;

    let mut lines = vec![BACKOFF_HELPER.to_string()];

    let docker = if spec.accelerators.count > 0 {
        lines.push(GPU_RUNTIME_SETUP.to_string());
        "nvidia-docker"
    } else {
        "docker"
    };

    if container.stackdriver_agent {
        lines.push(STACKDRIVER_AGENT.to_string());
    }

    let mut run = vec![
        format!("{} run -d", docker),
        format!("-e PROJECT={}", spec.project_id),
        format!("-e ZONE={}", spec.zone),
        "-e DOCKER_HOSTNAME=$(hostname)".to_string(),
        format!("-e PIPELINE={}", base.name),
        format!("-e FLOTILLA_JOB_SUBSCRIPTION={}", base.job_subscription()),
        format!("-e FLOTILLA_PROGRESS_TOPIC={}", base.progress_topic()),
    ];
    if !container.options.is_empty() {
        run.push(container.options.clone());
    }
    run.push(container.image.clone());
    if !container.command.is_empty() {
        run.push(container.command.clone());
    }

    lines.push(format!("with_backoff {} pull {}", docker, container.image));
    lines.push(format!("for i in $(seq 1 {}); do", container.size));
    lines.push(format!("  {}", run.join(" \\\n    ")));
    lines.push("done".to_string());

    lines.join("\n")
}
