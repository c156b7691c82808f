//! Organization command handlers
//!
//! Administrative commands; the configured token must be the orchestrator's
//! admin token.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use flotilla_core::domain::organization::Organization;
use flotilla_core::dto::organization::CreateOrganization;
use uuid::Uuid;

use super::timestamp;
use crate::config::Config;

/// Organization subcommands
#[derive(Subcommand)]
pub enum OrgCommands {
    /// Create an organization
    Create {
        name: String,

        #[arg(short, long)]
        memo: Option<String>,

        /// Initial token budget
        #[arg(short, long, default_value = "0")]
        tokens: i64,
    },
    /// List organizations
    List,
    /// Get organization details and its auth tokens
    Get { id: Uuid },
    /// Add tokens to an organization (negative values remove them)
    Tokens {
        id: Uuid,

        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },
    /// Issue a new auth token
    IssueToken { id: Uuid },
    /// Disable an auth token
    DisableToken { token_id: Uuid },
    /// Delete an auth token
    DeleteToken { token_id: Uuid },
}

/// Handle organization commands
pub async fn handle_org_command(command: OrgCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        OrgCommands::Create { name, memo, tokens } => {
            let org = client
                .create_organization(CreateOrganization {
                    name,
                    memo,
                    token_amount: tokens,
                })
                .await?;
            println!("{}", "✓ Organization created".green().bold());
            print_organization(&org);
        }
        OrgCommands::List => {
            let orgs = client.list_organizations().await?;
            if orgs.is_empty() {
                println!("{}", "No organizations found.".yellow());
            }
            for org in orgs {
                print_organization(&org);
                println!();
            }
        }
        OrgCommands::Get { id } => {
            let org = client.get_organization(id).await?;
            print_organization(&org);

            let tokens = client.list_auth_tokens(id).await?;
            println!("\n{}", "Auth tokens:".bold());
            for token in tokens {
                let state = if token.disabled {
                    "disabled".red()
                } else {
                    "enabled".green()
                };
                println!(
                    "  {} {} ({})",
                    token.id.to_string().dimmed(),
                    state,
                    timestamp(&token.created_at)
                );
            }
        }
        OrgCommands::Tokens { id, delta } => {
            let org = client.adjust_tokens(id, delta).await?;
            println!(
                "{} {} now has {} tokens",
                "✓".green().bold(),
                org.name.bold(),
                org.token_amount
            );
        }
        OrgCommands::IssueToken { id } => {
            let token = client.create_auth_token(id).await?;
            println!("{}", "✓ Auth token issued (shown only once)".green().bold());
            println!("  ID:    {}", token.id.to_string().dimmed());
            println!("  Token: {}", token.token.cyan());
        }
        OrgCommands::DisableToken { token_id } => {
            client.disable_auth_token(token_id).await?;
            println!("{} token {} disabled", "✓".green().bold(), token_id);
        }
        OrgCommands::DeleteToken { token_id } => {
            client.delete_auth_token(token_id).await?;
            println!("{} token {} deleted", "✓".green().bold(), token_id);
        }
    }

    Ok(())
}

fn print_organization(org: &Organization) {
    println!("  {} {}", "▸".cyan(), org.name.bold());
    println!("    ID:      {}", org.id.to_string().dimmed());
    println!("    Tokens:  {}", org.token_amount);
    if let Some(memo) = &org.memo {
        println!("    Memo:    {}", memo.dimmed());
    }
    println!("    Created: {}", timestamp(&org.created_at).dimmed());
}
