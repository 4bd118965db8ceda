//! Stored identity inspection.

use anyhow::Result;
use colored::Colorize;

use lobby_core::identity::IdentityStore;
use lobby_infrastructure::TomlIdentityStore;

pub async fn show() -> Result<()> {
    let store = TomlIdentityStore::default_location()?;
    let identity = store.get_or_create().await?;
    println!("visitor id: {}", identity.visitor_id.cyan());
    println!("session id: {}", identity.session_id.cyan());
    println!("chat room:  {}", identity.chat_room_id());
    Ok(())
}

pub async fn reset() -> Result<()> {
    let store = TomlIdentityStore::default_location()?;
    store.reset_session().await?;
    let identity = store.get_or_create().await?;
    println!("{}", "session rotated".green());
    println!("visitor id: {}", identity.visitor_id.cyan());
    println!("session id: {}", identity.session_id.cyan());
    Ok(())
}
