//! skein: command-line client for Mastodon-compatible servers.
//!
//! Every command runs against one [`EntityCache`], so related lookups share
//! requests the same way a long-running client would:
//! - `account`, `lookup`: a single account, optionally with its relationship
//! - `followers`, `following`, `blocks`, `mutes`: paginated account lists
//! - `follow`, `unfollow`: optimistic relationship changes
//! - `groups`, `members`, `join`, `leave`: group search and membership
//! - `timeline`, `stream`: statuses, fetched once or followed live

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skein_api::features::{
    AccountList, AccountOptions, AccountState, use_account, use_account_list, use_account_lookup, use_follow,
    use_group_members, use_groups, use_join_group, use_leave_group, use_timeline,
};
use skein_api::{GroupRole, HttpApi, StreamManager, Timeline};
use skein_entities::{Api, CacheConfig, EntitiesOptions, EntityCache, FetchStatus, StalenessPolicy};

/// Parse a timeline name: `home`, `public`, `local`, `account:<id>` or
/// `group:<id>`.
fn parse_timeline(s: &str) -> Result<Timeline, String> {
    match s.split_once(':') {
        None => match s {
            "home" => Ok(Timeline::Home),
            "public" => Ok(Timeline::Public),
            "local" => Ok(Timeline::Local),
            _ => Err(format!("unknown timeline '{}'", s)),
        },
        Some(("account", id)) if !id.is_empty() => Ok(Timeline::Account(id.to_string())),
        Some(("group", id)) if !id.is_empty() => Ok(Timeline::Group(id.to_string())),
        _ => Err(format!("invalid timeline '{}', expected home/public/local/account:<id>/group:<id>", s)),
    }
}

fn parse_role(s: &str) -> Result<GroupRole, String> {
    match s.to_lowercase().as_str() {
        "owner" => Ok(GroupRole::Owner),
        "admin" => Ok(GroupRole::Admin),
        "user" => Ok(GroupRole::User),
        _ => Err(format!("invalid role '{}', expected owner/admin/user", s)),
    }
}

#[derive(Parser)]
#[command(name = "skein")]
#[command(about = "Cached client for Mastodon-compatible servers", long_about = None)]
struct Cli {
    /// Server URL
    #[arg(long, global = true, env = "SKEIN_BASE_URL", default_value = "https://mastodon.social")]
    base_url: String,

    /// OAuth access token
    #[arg(long, global = true, env = "SKEIN_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Discard responses that resolve after a newer request for the same data
    #[arg(long, global = true)]
    latest_request_wins: bool,

    /// Milliseconds batched lookups wait for other callers
    #[arg(long, global = true, default_value = "0")]
    batch_window_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show an account by id
    Account {
        id: String,

        /// Also show the relationship to the account
        #[arg(long)]
        relationship: bool,
    },

    /// Show an account by handle (user or user@domain)
    Lookup {
        acct: String,

        #[arg(long)]
        relationship: bool,
    },

    /// List an account's followers
    Followers {
        id: String,

        /// Number of pages to load
        #[arg(long, default_value = "1")]
        pages: usize,
    },

    /// List the accounts an account follows
    Following {
        id: String,

        #[arg(long, default_value = "1")]
        pages: usize,
    },

    /// List blocked accounts
    Blocks {
        #[arg(long, default_value = "1")]
        pages: usize,
    },

    /// List muted accounts
    Mutes {
        #[arg(long, default_value = "1")]
        pages: usize,
    },

    /// Follow an account
    Follow {
        id: String,

        /// Hide the account's boosts
        #[arg(long)]
        no_reblogs: bool,

        /// Notify on new posts
        #[arg(long)]
        notify: bool,
    },

    /// Unfollow an account
    Unfollow { id: String },

    /// Search groups
    Groups {
        query: String,

        #[arg(long, default_value = "1")]
        pages: usize,
    },

    /// List a group's members with a role
    Members {
        group_id: String,

        #[arg(long, default_value = "user", value_parser = parse_role)]
        role: GroupRole,
    },

    /// Join a group
    Join { group_id: String },

    /// Leave a group
    Leave { group_id: String },

    /// Show a page of a timeline
    Timeline {
        #[arg(value_parser = parse_timeline)]
        timeline: Timeline,

        #[arg(long, default_value = "1")]
        pages: usize,
    },

    /// Follow a timeline live
    Stream {
        #[arg(value_parser = parse_timeline)]
        timeline: Timeline,

        /// Streaming server URL (defaults to the server URL over WebSocket)
        #[arg(long, env = "SKEIN_STREAMING_URL")]
        streaming_url: Option<String>,
    },
}

/// Turn a failed fetch into a diagnostic.
fn check(status: &FetchStatus) -> Result<()> {
    match &status.error {
        Some(e) if status.is_unauthorized() => Err(miette!("not authorized: {}", e)),
        Some(e) => Err(miette!("request failed: {}", e)),
        None => Ok(()),
    }
}

fn print_account(state: AccountState) -> Result<()> {
    check(&state.status)?;
    let account = state.account.ok_or_else(|| miette!("account not found"))?;
    println!("{} @{} ({})", account.id, account.acct, account.display_name);
    println!(
        "  {} followers, {} following, {} statuses",
        account.followers_count, account.following_count, account.statuses_count
    );
    if let Some(relationship) = &account.relationship {
        println!(
            "  following: {}, followed by: {}, blocking: {}, muting: {}",
            relationship.following, relationship.followed_by, relationship.blocking, relationship.muting
        );
    }
    Ok(())
}

async fn print_account_list(cache: &EntityCache, api: &Arc<dyn Api>, list: AccountList, pages: usize) -> Result<()> {
    let query = use_account_list(cache, api, list, EntitiesOptions::default());
    let mut state = query.fetch().await;
    for _ in 1..pages {
        if !state.has_next_page() {
            break;
        }
        state = query.fetch_next_page().await;
    }
    check(&state.status)?;

    for account in &state.accounts {
        let following = account.relationship.as_ref().is_some_and(|r| r.following);
        println!("{} @{}{}", account.id, account.acct, if following { " (following)" } else { "" });
    }
    if let Some(total) = state.list.total_count {
        println!("{} of {}", state.accounts.len(), total);
    }
    Ok(())
}

fn streaming_url(base_url: &str) -> String {
    if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "skein=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let staleness = if cli.latest_request_wins {
        StalenessPolicy::LatestRequestWins
    } else {
        StalenessPolicy::LastResponseWins
    };
    let cache = EntityCache::with_config(
        CacheConfig::default()
            .with_staleness(staleness)
            .with_batch_window(Duration::from_millis(cli.batch_window_ms)),
    );

    let mut http = HttpApi::new(&cli.base_url);
    if let Some(token) = &cli.access_token {
        http = http.with_access_token(token);
    }
    let api: Arc<dyn Api> = Arc::new(http);

    match cli.command {
        Commands::Account { id, relationship } => {
            let mut options = AccountOptions::default();
            options.with_relationship = relationship;
            print_account(use_account(&cache, &api, &id, options).fetch().await)?;
        }
        Commands::Lookup { acct, relationship } => {
            let mut options = AccountOptions::default();
            options.with_relationship = relationship;
            print_account(use_account_lookup(&cache, &api, &acct, options).fetch().await)?;
        }
        Commands::Followers { id, pages } => {
            print_account_list(&cache, &api, AccountList::Followers(id), pages).await?;
        }
        Commands::Following { id, pages } => {
            print_account_list(&cache, &api, AccountList::Following(id), pages).await?;
        }
        Commands::Blocks { pages } => {
            print_account_list(&cache, &api, AccountList::Blocks, pages).await?;
        }
        Commands::Mutes { pages } => {
            print_account_list(&cache, &api, AccountList::Mutes, pages).await?;
        }
        Commands::Follow { id, no_reblogs, notify } => {
            let params = serde_json::json!({"reblogs": !no_reblogs, "notify": notify});
            use_follow(&cache, &api).follow(&id, Some(params)).await.into_diagnostic()?;
            println!("following {}", id);
        }
        Commands::Unfollow { id } => {
            use_follow(&cache, &api).unfollow(&id).await.into_diagnostic()?;
            println!("unfollowed {}", id);
        }
        Commands::Groups { query, pages } => {
            let groups = use_groups(&cache, &api, &query, EntitiesOptions::default());
            let mut state = groups.fetch().await;
            for _ in 1..pages {
                if !state.has_next_page() {
                    break;
                }
                state = groups.fetch_next_page().await;
            }
            check(&state.status)?;

            for entry in &state.groups {
                let member = entry.relationship.as_ref().is_some_and(|r| r.member);
                println!(
                    "{} {} ({} members){}",
                    entry.group.id,
                    entry.group.display_name,
                    entry.group.members_count,
                    if member { " [member]" } else { "" }
                );
            }
        }
        Commands::Members { group_id, role } => {
            let members = use_group_members(&cache, &api, &group_id, role, EntitiesOptions::default());
            let state = members.fetch().await;
            check(&state.status)?;
            for membership in &state.entities {
                println!("{} @{} ({:?})", membership.account.id, membership.account.acct, membership.role);
            }
        }
        Commands::Join { group_id } => {
            let relationship = use_join_group(&cache, &api, &group_id).submit().await.into_diagnostic()?;
            let state = if relationship.requested { "requested" } else { "joined" };
            println!("{} {}", state, group_id);
        }
        Commands::Leave { group_id } => {
            use_leave_group(&cache, &api, &group_id).submit().await.into_diagnostic()?;
            println!("left {}", group_id);
        }
        Commands::Timeline { timeline, pages } => {
            let query = use_timeline(&cache, &api, &timeline, EntitiesOptions::default());
            let mut state = query.fetch().await;
            for _ in 1..pages {
                if !state.has_next_page() {
                    break;
                }
                state = query.fetch_next_page().await;
            }
            check(&state.status)?;
            for status in &state.entities {
                println!("{} @{}: {}", status.id, status.account.acct, status.content);
            }
        }
        Commands::Stream { timeline, streaming_url: url } => {
            let url = url.unwrap_or_else(|| streaming_url(&cli.base_url));
            let mut streams = StreamManager::new(cache.clone(), url);
            if let Some(token) = &cli.access_token {
                streams = streams.with_access_token(token);
            }

            let mut subscription = cache.subscribe_list::<skein_api::Status>(timeline.list_path());
            streams.connect(timeline.clone()).await.into_diagnostic()?;
            info!(timeline = ?timeline, "streaming, press ctrl-c to stop");

            let mut seen = 0;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = subscription.changed() => {
                        let Some(statuses) = changed else { break };
                        for status in statuses.iter().take(statuses.len().saturating_sub(seen)) {
                            println!("{} @{}: {}", status.id, status.account.acct, status.content);
                        }
                        seen = statuses.len();
                    }
                }
            }
            streams.disconnect_all().await;
        }
    }

    Ok(())
}
