// Running verification commands against a bound consumer
use crate::container::{ContainerSpec, ImageRef};
use crate::errors::Result;
use crate::eval::{self, Retain};
use crate::session::Session;

pub struct VerificationRunner<'a> {
    session: &'a Session,
}

impl<'a> VerificationRunner<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Run `command` on top of `consumer` and return its stdout
    pub fn capture<S: AsRef<str>>(&self, consumer: &ContainerSpec, command: &[S]) -> Result<String> {
        let spec = consumer.with_exec(command.iter().map(|arg| arg.as_ref()));
        let evaluation = eval::evaluate(self.session, &spec, Retain::Remove)?;
        Ok(evaluation.last.stdout)
    }

    /// Chain `commands` onto `consumer` and run them in order.
    ///
    /// Stops at the first failing command; the rest never run.
    pub fn sync<S: AsRef<str>>(&self, consumer: &ContainerSpec, commands: &[Vec<S>]) -> Result<()> {
        let spec = chain(consumer, commands);
        let evaluation = eval::evaluate(self.session, &spec, Retain::Remove)?;
        tracing::info!(steps = evaluation.steps, "sync complete");
        Ok(())
    }

    /// Run `commands`, then commit the resulting container as `reference` and push it
    pub fn publish<S: AsRef<str>>(
        &self,
        consumer: &ContainerSpec,
        commands: &[Vec<S>],
        reference: &ImageRef,
    ) -> Result<String> {
        let backend = self.session.backend();
        let cancel = self.session.cancel_token();
        let spec = chain(consumer, commands);
        let evaluation = eval::evaluate(self.session, &spec, Retain::Keep)?;

        let published = backend
            .commit(&evaluation.container, reference, cancel)
            .and_then(|_| backend.push(reference, cancel));
        let removed = backend.remove(&evaluation.container);

        let published = published?;
        removed?;
        tracing::info!(reference = %published, "published");
        Ok(published)
    }
}

fn chain<S: AsRef<str>>(consumer: &ContainerSpec, commands: &[Vec<S>]) -> ContainerSpec {
    commands.iter().fold(consumer.clone(), |spec, command| {
        spec.with_exec(command.iter().map(|arg| arg.as_ref()))
    })
}
