//! Container lifecycle management
//!
//! Start (with the one-shot prepare step and readiness waits), stop,
//! archive and destroy.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use chrono::Utc;
use cibox_shared::constants::ssh;
use cibox_shared::errors::{CiboxError, CiboxResult};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use super::metadata::MetaPatch;
use super::{LifecyclePhase, RuntimeContainer, RuntimeState, exec, prepare};
use crate::runtime::types::{CloneOptions, Store, StoreKind};
use crate::util::PhaseTimer;
use crate::util::poll::poll_until;
use crate::util::retry::{RetryConfig, retry_with_delay};

/// Upper bound for a single connect+read attempt on the ssh port.
const BANNER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// START
// ============================================================================

pub(super) async fn start(container: &mut RuntimeContainer) -> CiboxResult<()> {
    let phase = container.phase.phase();
    if !phase.can_start() {
        return Err(CiboxError::InvalidState(format!(
            "Cannot start {} container {}",
            phase,
            container.name()
        )));
    }

    if phase.is_pristine() && !container.prepare.is_flushed() && !container.prepare.is_empty() {
        prepare::flush(container).await?;
    }

    boot(container).await?;

    container.metadata.merge(&MetaPatch {
        started: Some(Utc::now()),
        ..Default::default()
    })?;
    if !container.phase.phase().is_running() {
        container.phase.transition_to(LifecyclePhase::Running)?;
    }
    Ok(())
}

/// Boot an archived container, run `command` in it and stop it again.
///
/// The container stays in the archive and its metadata is left alone.
pub(super) async fn inspect(container: &mut RuntimeContainer, command: &str) -> CiboxResult<i32> {
    if container.phase.phase() != LifecyclePhase::Archived {
        return Err(CiboxError::InvalidState(format!(
            "Only archived containers can be inspected, {} is {}",
            container.name(),
            container.phase.phase()
        )));
    }

    let status = match boot(container).await {
        Ok(()) => exec::execute(container, command).await,
        Err(e) => Err(e),
    };
    if let Err(e) = halt(container).await {
        tracing::warn!(container = %container.descriptor, error = %e, "failed to stop after inspect");
        status?;
        return Err(e);
    }
    status
}

/// Bring the container to RUNNING and wait until it is reachable over ssh.
async fn boot(container: &mut RuntimeContainer) -> CiboxResult<()> {
    let runtime = container.runtime.clone();
    let backend = runtime.backends.containers.as_ref();
    let timeouts = &runtime.options.timeouts;
    let desc = container.descriptor.clone();

    if backend.state(&desc).await? != RuntimeState::Running {
        let _timer = PhaseTimer::new("Waiting for the container to boot");
        if !backend.start(&desc, None).await? {
            return Err(CiboxError::Operation(format!(
                "Failed to start container {}",
                desc.name
            )));
        }
        if !backend
            .wait_for_state(&desc, RuntimeState::Running, timeouts.boot())
            .await?
        {
            return Err(CiboxError::Timeout(format!(
                "Container {} did not reach RUNNING within {:?}",
                desc.name,
                timeouts.boot()
            )));
        }
    }

    let addresses = {
        let _timer = PhaseTimer::new("Waiting for a network address");
        let desc = &desc;
        poll_until(
            timeouts.poll_interval(),
            timeouts.network(),
            &format!("waiting for a network address of {}", desc.name),
            move || async move {
                let addresses = backend.network_addresses(desc).await?;
                Ok((!addresses.is_empty()).then_some(addresses))
            },
        )
        .await?
    };

    let address = addresses[0];
    {
        let _timer = PhaseTimer::new("Waiting for the ssh server");
        wait_for_ssh_banner(
            address,
            runtime.options.ssh_port,
            timeouts.poll_interval(),
            timeouts.ssh(),
        )
        .await?;
    }
    tokio::time::sleep(timeouts.settle()).await;

    container.addresses = addresses;
    tracing::info!(container = %desc, %address, "Container running");
    Ok(())
}

/// Wait until `address:port` greets with an ssh identification string.
pub async fn wait_for_ssh_banner(
    address: IpAddr,
    port: u16,
    interval: Duration,
    timeout: Duration,
) -> CiboxResult<()> {
    let target = SocketAddr::new(address, port);
    let attempt_timeout = BANNER_ATTEMPT_TIMEOUT.min(timeout.max(interval));

    poll_until(
        interval,
        timeout,
        &format!("waiting for ssh on {target}, is the ssh server installed?"),
        move || async move { Ok(read_banner(target, attempt_timeout).await.then_some(())) },
    )
    .await
}

async fn read_banner(target: SocketAddr, attempt_timeout: Duration) -> bool {
    let attempt = async {
        let mut stream = TcpStream::connect(target).await.ok()?;
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await.ok()?;
        Some(prefix)
    };

    match tokio::time::timeout(attempt_timeout, attempt).await {
        Ok(Some(prefix)) => prefix.as_slice() == ssh::BANNER_PREFIX,
        _ => false,
    }
}

// ============================================================================
// STOP
// ============================================================================

pub(super) async fn stop(container: &mut RuntimeContainer) -> CiboxResult<()> {
    let phase = container.phase.phase();
    if phase == LifecyclePhase::Destroyed {
        return Err(CiboxError::InvalidState(format!(
            "Cannot stop destroyed container {}",
            container.name()
        )));
    }

    if halt(container).await? {
        container.metadata.merge(&MetaPatch {
            stopped: Some(Utc::now()),
            ..Default::default()
        })?;
    }
    if phase.is_running() {
        container.phase.transition_to(LifecyclePhase::Stopped)?;
    }
    Ok(())
}

/// Stop the container if it is running. Returns whether it had to be stopped.
async fn halt(container: &mut RuntimeContainer) -> CiboxResult<bool> {
    let runtime = container.runtime.clone();
    let backend = runtime.backends.containers.as_ref();
    let timeouts = &runtime.options.timeouts;
    let desc = &container.descriptor;

    if backend.state(desc).await? == RuntimeState::Stopped {
        tracing::debug!(container = %desc, "already stopped");
        container.addresses.clear();
        return Ok(false);
    }

    let _timer = PhaseTimer::new("Stopping the container");
    if !backend.stop(desc).await? {
        return Err(CiboxError::Operation(format!(
            "Failed to stop container {}",
            desc.name
        )));
    }
    if !backend
        .wait_for_state(desc, RuntimeState::Stopped, timeouts.stop())
        .await?
    {
        return Err(CiboxError::Timeout(format!(
            "Container {} did not stop within {:?}",
            desc.name,
            timeouts.stop()
        )));
    }

    container.addresses.clear();
    Ok(true)
}

// ============================================================================
// ARCHIVE
// ============================================================================

pub(super) async fn archive(container: &mut RuntimeContainer) -> CiboxResult<()> {
    let phase = container.phase.phase();
    if phase.is_terminal() {
        return Err(CiboxError::InvalidState(format!(
            "Cannot archive {} container {}",
            phase,
            container.name()
        )));
    }

    stop(container).await?;

    let runtime = container.runtime.clone();
    let options = &runtime.options;
    let archive_store = Store::new(StoreKind::Archive, options.archive_store.clone());

    if options.stores_coincide() {
        container.metadata.merge(&MetaPatch {
            archived: Some(true),
            ..Default::default()
        })?;
        container.descriptor.store = archive_store;
        container.phase.transition_to(LifecyclePhase::Archived)?;
        tracing::info!(container = %container.descriptor, "Archived in place");
        return Ok(());
    }

    let _timer = PhaseTimer::new("Archiving the container");
    let backend = runtime.backends.containers.as_ref();

    std::fs::create_dir_all(archive_store.path()).map_err(|e| {
        CiboxError::Archive(format!(
            "Failed to create archive store {}: {}",
            archive_store.path().display(),
            e
        ))
    })?;

    let archived = backend
        .clone_container(
            &container.descriptor,
            container.name(),
            &archive_store,
            &CloneOptions::default(),
        )
        .await
        .map_err(|e| {
            CiboxError::Archive(format!(
                "Failed to clone {} into the archive: {}",
                container.name(),
                e
            ))
        })?;

    let destroyed = backend.destroy(&container.descriptor).await.map_err(|e| {
        CiboxError::Archive(format!(
            "Archived {} but failed to destroy the runtime copy: {}",
            container.name(),
            e
        ))
    })?;
    if !destroyed {
        return Err(CiboxError::Archive(format!(
            "Archived {} but failed to destroy the runtime copy",
            container.name()
        )));
    }

    container.rebind(archived);
    container.metadata.merge(&MetaPatch {
        archived: Some(true),
        ..Default::default()
    })?;
    container.phase.transition_to(LifecyclePhase::Archived)?;

    tracing::info!(container = %container.descriptor, "Archived");
    Ok(())
}

// ============================================================================
// DESTROY
// ============================================================================

pub(super) async fn destroy(container: &mut RuntimeContainer) -> CiboxResult<()> {
    if container.phase.phase() == LifecyclePhase::Destroyed {
        return Err(CiboxError::InvalidState(format!(
            "Container {} is already destroyed",
            container.name()
        )));
    }

    stop(container).await?;

    let runtime = container.runtime.clone();
    let backend = runtime.backends.containers.as_ref();
    let desc = &container.descriptor;

    {
        let _timer = PhaseTimer::new("Destroying the container");
        retry_with_delay(
            RetryConfig::once_after(runtime.options.timeouts.destroy_backoff()),
            "destroy container",
            move || async move {
                match backend.destroy(desc).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(CiboxError::Operation(format!(
                        "Failed to destroy container {}",
                        desc.name
                    ))),
                    Err(e) => Err(CiboxError::Operation(format!(
                        "Failed to destroy container {}: {}",
                        desc.name, e
                    ))),
                }
            },
        )
        .await?;
    }

    container.addresses.clear();
    container.phase.transition_to(LifecyclePhase::Destroyed)?;
    tracing::info!(container = %container.descriptor, "Destroyed");
    Ok(())
}
