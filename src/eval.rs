// Evaluating a spec's exec chain: nothing runs until a result is asked for
use crate::backend::ExecOutput;
use crate::container::{ContainerId, ContainerSpec};
use crate::errors::{DindError, Result};
use crate::session::Session;

/// What to do with the consumer container once its chain has run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retain {
    Remove,
    /// Leave it for the caller (e.g. to commit it); caller must remove it
    Keep,
}

/// Outcome of a fully evaluated chain
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub container: ContainerId,
    /// Output of the last exec, or empty when the chain has no execs
    pub last: ExecOutput,
    pub steps: usize,
}

/// Run every exec of `spec` in order inside one fresh consumer container.
///
/// Each step sees the filesystem left by the previous ones. The first
/// non-zero exit stops the chain and is returned as `DindError::Execution`;
/// the container is removed on every failure path.
pub fn evaluate(session: &Session, spec: &ContainerSpec, retain: Retain) -> Result<Evaluation> {
    let backend = session.backend();
    let cancel = session.cancel_token();

    let span = tracing::info_span!("pipeline", name = %spec.pipeline_path());
    let _guard = span.enter();

    for exec in spec.execs() {
        if exec.args.is_empty() {
            return Err(DindError::InvalidSpec(
                "exec with an empty command".to_string(),
            ));
        }
    }

    cancel.check()?;
    backend.ensure_image(spec.image(), cancel)?;
    let container = backend.create_consumer(spec, cancel)?;

    match run_chain(session, spec, &container) {
        Ok(last) => {
            if retain == Retain::Remove {
                backend.remove(&container)?;
            }
            Ok(Evaluation {
                container,
                last,
                steps: spec.execs().len(),
            })
        }
        Err(e) => {
            if let Err(cleanup) = backend.remove(&container) {
                tracing::warn!(container = %container, error = %cleanup, "failed to remove consumer");
            }
            Err(e)
        }
    }
}

fn run_chain(session: &Session, spec: &ContainerSpec, container: &ContainerId) -> Result<ExecOutput> {
    let backend = session.backend();
    let cancel = session.cancel_token();
    let mut last = ExecOutput::default();

    for exec in spec.execs() {
        cancel.check()?;
        tracing::info!(command = %exec.args.join(" "), "exec");

        let output = backend.exec(container, exec, cancel)?;
        if !output.success() {
            return Err(DindError::Execution {
                command: exec.args.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        last = output;
    }

    Ok(last)
}
