use anyhow::{Context, Result};

use super::{expect_args, Command, State};
use crate::storage::DatabaseError;

/// `register <name>`: create a user and make it current.
pub(super) async fn register(state: &mut State, cmd: &Command) -> Result<()> {
    let [name] = expect_args::<1>(cmd, "register <name>")?;

    let user = match state.db.create_user(name).await {
        Ok(user) => user,
        Err(DatabaseError::Duplicate(_)) => anyhow::bail!("user '{}' already exists", name),
        Err(e) => return Err(e).context("Failed to create user"),
    };

    state
        .config
        .set_user(&user.name, &state.config_path)
        .context("Failed to save config")?;

    tracing::info!(user = %user.name, id = user.id, "User registered");
    println!("Registered {} and logged in", user.name);
    Ok(())
}

/// `login <name>`: switch the current user to an existing one.
pub(super) async fn login(state: &mut State, cmd: &Command) -> Result<()> {
    let [name] = expect_args::<1>(cmd, "login <name>")?;

    let user = match state.db.get_user(name).await {
        Ok(user) => user,
        Err(DatabaseError::NotFound(_)) => anyhow::bail!("user '{}' does not exist", name),
        Err(e) => return Err(e).context("Failed to look up user"),
    };

    state
        .config
        .set_user(&user.name, &state.config_path)
        .context("Failed to save config")?;

    println!("Logged in as {}", user.name);
    Ok(())
}

/// `reset`: delete every user, and with them all feeds, follows and posts.
pub(super) async fn reset(state: &mut State, cmd: &Command) -> Result<()> {
    let [] = expect_args::<0>(cmd, "reset")?;

    let removed = state
        .db
        .reset_users()
        .await
        .context("Failed to reset database")?;

    tracing::warn!(users = removed, "Database reset");
    println!("Database reset ({} users removed)", removed);
    Ok(())
}

/// `users`: list users, marking the current one.
pub(super) async fn list(state: &mut State, cmd: &Command) -> Result<()> {
    let [] = expect_args::<0>(cmd, "users")?;

    let users = state.db.get_users().await.context("Failed to list users")?;
    let current = state.config.current_user_name.as_deref();

    for user in &users {
        if Some(user.name.as_str()) == current {
            println!("* {} (current)", user.name);
        } else {
            println!("* {}", user.name);
        }
    }
    Ok(())
}
