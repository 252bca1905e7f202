//! Resolve identities for a profile and submit the data-prep job.

use wq_types::{ConfigError, LaunchConfig, WqResult};

use crate::client::{GitRef, OrchestrationClient, RunRequest, SubmissionAck};

/// Resolve owner, project and hardware tier into a submittable request.
///
/// An unknown hardware tier is a configuration error raised before any
/// payload exists.
pub async fn build_run_request(
    client: &OrchestrationClient,
    config: &LaunchConfig,
) -> WqResult<RunRequest> {
    let owner = client.resolve_owner().await?;
    tracing::info!("Resolved owner id {owner}");

    let project_id = client.resolve_project(&owner, &config.project_name).await?;
    tracing::info!("Resolved project {} to {project_id}", config.project_path());

    let hardware_tier = client
        .resolve_hardware_tier(&config.hardware_tier)
        .await?
        .ok_or_else(|| ConfigError::UnknownHardwareTier {
            name: config.hardware_tier.clone(),
        })?;
    tracing::info!("Resolved hardware tier {} to {hardware_tier}", config.hardware_tier);

    Ok(RunRequest {
        project_id,
        run_command: config.data_prep_command.clone(),
        main_repo_git_ref: GitRef::branch(config.profile.branch()),
        hardware_tier,
        environment_id: config.environment_id.clone(),
    })
}

/// Build the request and submit it. With `dry_run` nothing is submitted.
pub async fn launch(
    client: &OrchestrationClient,
    config: &LaunchConfig,
    dry_run: bool,
) -> WqResult<(RunRequest, Option<SubmissionAck>)> {
    let request = build_run_request(client, config).await?;
    if dry_run {
        tracing::info!("Dry run, not submitting");
        return Ok((request, None));
    }

    let ack = client.submit_run(&request).await?;
    match &ack.job_id {
        Some(job_id) => tracing::info!("Submitted job {job_id} (HTTP {})", ack.status_code),
        None => tracing::info!("Submitted job (HTTP {}): {}", ack.status_code, ack.body),
    }
    Ok((request, Some(ack)))
}
