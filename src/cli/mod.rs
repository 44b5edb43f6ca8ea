pub mod publish;
pub mod run;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::errors::Result;
use crate::session::Session;
use std::env;

/// Load config from the working directory and open a session whose token
/// is cancelled by Ctrl-C / SIGTERM
fn open_session() -> Result<(Config, Session)> {
    // `load` validates whatever it reads from disk.
    let config = Config::load(&env::current_dir()?)?;

    let cancel = CancelToken::new();
    cancel.cancel_on_signals()?;

    let session = Session::connect(&config, cancel)?;
    Ok((config, session))
}
