//! CLI command registry and handlers.
//!
//! Each subcommand is an async handler over the shared [`State`]. Handlers
//! that act on behalf of a user are wrapped in [`logged_in`], which resolves
//! the current user from the configuration before the handler runs.

mod agg;
mod browse;
mod feeds;
mod users;

use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::storage::{Database, DatabaseError, User};

/// Failures reported by the registry itself rather than by a handler's work.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    /// No current user, or the configured one no longer exists
    #[error("not logged in: run `gator login <name>` or `gator register <name>` first")]
    NotLoggedIn,
}

/// Everything a handler may touch.
pub struct State {
    pub db: Database,
    pub config: Config,
    /// Where `config` is written back when the current user changes
    pub config_path: PathBuf,
    pub http: reqwest::Client,
}

impl State {
    pub fn new(db: Database, config: Config, config_path: PathBuf) -> Self {
        Self {
            db,
            config,
            config_path,
            http: reqwest::Client::new(),
        }
    }
}

/// A parsed invocation: `gator <name> [args...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

pub type Handler =
    Box<dyn for<'a> Fn(&'a mut State, &'a Command) -> BoxFuture<'a, Result<()>> + Send + Sync>;

fn boxed<F>(f: F) -> Handler
where
    F: for<'a> Fn(&'a mut State, &'a Command) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Wrap a handler that needs the current user.
///
/// Fails with [`CommandError::NotLoggedIn`] when no user is selected or the
/// selected user was deleted (e.g. by `reset`).
pub fn logged_in<F>(f: F) -> Handler
where
    F: for<'a> Fn(&'a mut State, &'a Command, User) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    let f = Arc::new(f);
    boxed(move |state, cmd| {
        let f = Arc::clone(&f);
        Box::pin(async move {
            let user = current_user(state).await?;
            (*f)(state, cmd, user).await
        })
    })
}

async fn current_user(state: &State) -> Result<User> {
    let name = state
        .config
        .current_user_name
        .as_deref()
        .ok_or(CommandError::NotLoggedIn)?;

    match state.db.get_user(name).await {
        Ok(user) => Ok(user),
        Err(DatabaseError::NotFound(_)) => {
            tracing::debug!(user = %name, "Configured user no longer exists");
            Err(CommandError::NotLoggedIn.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Name → handler table.
#[derive(Default)]
pub struct Commands {
    handlers: HashMap<String, Handler>,
}

impl Commands {
    /// Registry with every gator command installed
    pub fn standard() -> Self {
        let mut commands = Self::default();
        commands.register("register", boxed(|s, c| Box::pin(users::register(s, c))));
        commands.register("login", boxed(|s, c| Box::pin(users::login(s, c))));
        commands.register("reset", boxed(|s, c| Box::pin(users::reset(s, c))));
        commands.register("users", boxed(|s, c| Box::pin(users::list(s, c))));
        commands.register("feeds", boxed(|s, c| Box::pin(feeds::list(s, c))));
        commands.register("agg", boxed(|s, c| Box::pin(agg::run(s, c))));
        commands.register("addfeed", logged_in(|s, c, u| Box::pin(feeds::add(s, c, u))));
        commands.register("follow", logged_in(|s, c, u| Box::pin(feeds::follow(s, c, u))));
        commands.register("following", logged_in(|s, c, u| Box::pin(feeds::following(s, c, u))));
        commands.register("unfollow", logged_in(|s, c, u| Box::pin(feeds::unfollow(s, c, u))));
        commands.register("browse", logged_in(|s, c, u| Box::pin(browse::run(s, c, u))));
        commands
    }

    /// Install `handler` under `name`, replacing any previous one
    pub fn register(&mut self, name: &str, handler: Handler) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch `cmd` to its handler.
    pub async fn run(&self, state: &mut State, cmd: &Command) -> Result<()> {
        let handler = self
            .handlers
            .get(&cmd.name)
            .ok_or_else(|| CommandError::UnknownCommand(cmd.name.clone()))?;
        tracing::debug!(command = %cmd.name, args = ?cmd.args, "Running command");
        handler(state, cmd).await
    }
}

/// Exactly `N` arguments, or a usage error
fn expect_args<'c, const N: usize>(cmd: &'c Command, usage: &'static str) -> Result<[&'c str; N]> {
    let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
    <[&str; N]>::try_from(args).map_err(|_| CommandError::Usage(usage).into())
}
