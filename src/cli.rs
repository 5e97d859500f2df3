use clap::{Parser, Subcommand};
use color_eyre::eyre::{self, eyre};
use serde::Serialize;

use tweetkit::api::fields::{Fields, Granularity};
use tweetkit::api::types::{Includes, Media, Tweet};
use tweetkit::api::{CountsEndpoint, ReplySettings, XApiClient};
use tweetkit::auth::credentials::{
    ACCESS_TOKEN, ApplicationAuth, ClientAuth, CredentialProvider, EnvCredentials, OAuth1Credentials,
};
use tweetkit::auth::{AppAuthClient, AuthClient, AuthProvider, OAuth1Client, StdinPrompt, UserAuthClient};
use tweetkit::config::{AppConfig, load_config};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "tweetkit", about = "Command-line client for the X API v2")]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand)]
pub enum CliCommand {
    /// Request an application bearer token
    Token,
    /// Run the OAuth 2.0 PKCE authorization flow
    Auth,
    /// Search recent tweets (JSONL)
    Search {
        /// Search query
        query: String,
        #[arg(long)]
        max_results: Option<u32>,
        /// Number of pages to fetch
        #[arg(long, default_value_t = 1)]
        pages: u32,
        /// ISO-8601 UTC, e.g. 2021-11-01T00:00:00Z
        #[arg(long)]
        start_time: Option<String>,
        #[arg(long)]
        end_time: Option<String>,
        #[arg(long)]
        tweet_fields: Option<String>,
        #[arg(long)]
        expansions: Option<String>,
    },
    /// Count tweets matching a query (JSONL)
    Counts {
        query: String,
        /// minute, hour or day
        #[arg(long)]
        granularity: Option<String>,
        /// Use the full-archive endpoint
        #[arg(long)]
        all: bool,
    },
    /// Look up tweets by id (JSONL)
    Lookup {
        /// Comma-separated tweet ids
        ids: String,
        #[arg(long)]
        tweet_fields: Option<String>,
    },
    /// Tweets you have liked (JSONL)
    Liked {
        #[arg(long)]
        max_results: Option<u32>,
    },
    /// Users who liked a tweet (JSONL)
    #[command(name = "liking-users")]
    LikingUsers {
        /// Tweet ID or URL
        id_or_url: String,
    },
    /// Like a tweet
    Like { id_or_url: String },
    /// Remove a like
    Unlike { id_or_url: String },
    /// Post a tweet
    Tweet {
        text: String,
        /// Cut text to 280 characters instead of failing
        #[arg(long)]
        truncate: bool,
        #[arg(long)]
        reply_to: Option<String>,
        #[arg(long)]
        quote: Option<String>,
        /// everyone, mentionedUsers or following
        #[arg(long)]
        reply_settings: Option<String>,
        /// Poll option; repeat for each option
        #[arg(long = "poll")]
        poll_options: Vec<String>,
        #[arg(long, default_value_t = 1440)]
        poll_minutes: u32,
    },
    /// Delete a tweet
    Delete { id_or_url: String },
}

// ---------------------------------------------------------------------------
// Denormalization helper
// ---------------------------------------------------------------------------

/// Build a self-contained JSON object for a tweet with its author and media
/// embedded.
fn denormalize_tweet(tweet: &Tweet, includes: Option<&Includes>) -> serde_json::Value {
    let author = includes.and_then(|inc| {
        tweet
            .author_id
            .as_ref()
            .and_then(|aid| inc.users.iter().find(|u| &u.id == aid))
    });

    let media: Vec<&Media> = match (includes, tweet.attachments.as_ref()) {
        (Some(inc), Some(att)) => att
            .media_keys
            .iter()
            .filter_map(|k| inc.media.iter().find(|m| &m.media_key == k))
            .collect(),
        _ => Vec::new(),
    };

    serde_json::json!({
        "tweet": tweet,
        "author": author,
        "media": media,
    })
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_line(value: &impl Serialize) -> eyre::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Print a list of tweets as JSONL to stdout.
fn print_tweets(tweets: &[Tweet], includes: Option<&Includes>) -> eyre::Result<()> {
    for tweet in tweets {
        print_line(&denormalize_tweet(tweet, includes))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Client construction
// ---------------------------------------------------------------------------

fn app_auth(config: &AppConfig) -> eyre::Result<AppAuthClient> {
    let keys = ApplicationAuth::from_provider(&EnvCredentials::load())?;
    Ok(AppAuthClient::new(keys, config)?)
}

/// OAuth 1.0a when access tokens are configured, otherwise OAuth 2.0 PKCE.
fn user_auth(config: &AppConfig) -> eyre::Result<AuthProvider> {
    let creds = EnvCredentials::load();
    if creds.get(ACCESS_TOKEN).is_some() {
        let keys = OAuth1Credentials::from_provider(&creds)?;
        return Ok(OAuth1Client::new(keys).into());
    }
    let keys = ClientAuth::from_provider(&creds).map_err(|e| {
        eyre!("{e}\nUser commands need TW_ACCESS_TOKEN/TW_ACCESS_SECRET or TW_CLIENT_ID/TW_REDIRECT_URI.")
    })?;
    Ok(UserAuthClient::new(keys, config, StdinPrompt).into())
}

fn app_client(config: &AppConfig) -> eyre::Result<XApiClient> {
    Ok(XApiClient::new(AuthProvider::from(app_auth(config)?), config)?)
}

fn user_client(config: &AppConfig) -> eyre::Result<XApiClient> {
    let auth = user_auth(config)?;
    tracing::info!(method = ?auth.method(), "user auth initialized");
    Ok(XApiClient::new(auth, config)?)
}

// ---------------------------------------------------------------------------
// Command execution
// ---------------------------------------------------------------------------

/// Extract a tweet ID from either a raw ID or a tweet URL.
fn parse_tweet_id(id_or_url: &str) -> eyre::Result<String> {
    // If it looks like a URL, extract the status ID from the path.
    if id_or_url.starts_with("http://") || id_or_url.starts_with("https://") {
        let url = url::Url::parse(id_or_url).map_err(|e| eyre!("invalid URL: {e}"))?;
        // Expected path: /<user>/status/<id>
        let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
        if let Some(pos) = segments.iter().position(|&s| s == "status")
            && let Some(id) = segments.get(pos + 1)
        {
            return Ok(id.to_string());
        }
        Err(eyre!("could not extract tweet ID from URL: {id_or_url}"))
    } else {
        Ok(id_or_url.to_string())
    }
}

fn log_limits(client: &XApiClient) {
    tracing::info!(
        remaining = client.limit_remaining(),
        reset = %client.limit_reset(),
        "rate limit"
    );
}

pub async fn run_command(cli: Cli) -> eyre::Result<()> {
    let config = load_config();

    match cli.command {
        CliCommand::Token => {
            let mut auth = app_auth(&config)?;
            let token = auth.get_bearer().await?;
            print_line(&serde_json::json!({ "token_type": "bearer", "access_token": token }))?;
        }

        CliCommand::Auth => {
            let creds = EnvCredentials::load();
            let keys = ClientAuth::from_provider(&creds)?;
            let mut auth = UserAuthClient::new(keys, &config, StdinPrompt);
            let token = auth.get_bearer().await?;
            print_line(&serde_json::json!({ "token_type": "bearer", "access_token": token }))?;
        }

        CliCommand::Search {
            query,
            max_results,
            pages,
            start_time,
            end_time,
            tweet_fields,
            expansions,
        } => {
            let fields = Fields::new()
                .query(Some(&query))
                .max_results(max_results)?
                .start_time(start_time)?
                .end_time(end_time)?
                .tweet_fields(tweet_fields.as_deref())
                .expansions(expansions.as_deref());

            let mut client = app_client(&config)?;
            for _ in 0..pages.max(1) {
                let page = client.search_recent(&fields).await?;
                if let Some(tweets) = &page.data {
                    print_tweets(tweets, page.includes.as_ref())?;
                }
                if !client.more() {
                    break;
                }
            }
            log_limits(&client);
        }

        CliCommand::Counts {
            query,
            granularity,
            all,
        } => {
            let granularity = granularity.as_deref().map(str::parse::<Granularity>).transpose()?;
            let fields = Fields::new().query(Some(&query)).granularity(granularity);
            let endpoint = if all {
                CountsEndpoint::All
            } else {
                CountsEndpoint::Recent
            };

            let mut client = app_client(&config)?;
            let counts = client.tweet_counts(endpoint, &fields).await?;
            for bucket in counts.data.unwrap_or_default() {
                print_line(&bucket)?;
            }
            if let Some(meta) = &counts.meta {
                print_line(&serde_json::json!({ "meta": meta }))?;
            }
        }

        CliCommand::Lookup { ids, tweet_fields } => {
            let fields = Fields::new()
                .ids(Some(&ids))?
                .tweet_fields(tweet_fields.as_deref());
            let mut client = app_client(&config)?;
            let tweets = client.lookup_tweets(&fields).await?;
            print_tweets(&tweets, None)?;
        }

        CliCommand::Liked { max_results } => {
            let fields = Fields::new().max_results(max_results)?;
            let mut client = user_client(&config)?;
            let page = client.liked_tweets(&fields).await?;
            if let Some(tweets) = &page.data {
                print_tweets(tweets, page.includes.as_ref())?;
            }
        }

        CliCommand::LikingUsers { id_or_url } => {
            let tweet_id = parse_tweet_id(&id_or_url)?;
            let mut client = app_client(&config)?;
            let page = client.liking_users(&tweet_id, &Fields::new()).await?;
            for user in page.data.unwrap_or_default() {
                print_line(&serde_json::json!({ "user": user }))?;
            }
        }

        CliCommand::Like { id_or_url } => {
            let tweet_id = parse_tweet_id(&id_or_url)?;
            let mut client = user_client(&config)?;
            let resp = client.like(&tweet_id).await?;
            print_line(&resp)?;
        }

        CliCommand::Unlike { id_or_url } => {
            let tweet_id = parse_tweet_id(&id_or_url)?;
            let mut client = user_client(&config)?;
            let resp = client.unlike(&tweet_id).await?;
            print_line(&resp)?;
        }

        CliCommand::Tweet {
            text,
            truncate,
            reply_to,
            quote,
            reply_settings,
            poll_options,
            poll_minutes,
        } => {
            let mut client = user_client(&config)?;
            let mut draft = client.new_tweet(truncate).text(&text)?;
            if let Some(settings) = reply_settings {
                draft = draft.reply_settings(settings.parse::<ReplySettings>()?);
            }
            if let Some(id) = reply_to {
                draft = draft.reply(&parse_tweet_id(&id)?, Vec::new());
            }
            if let Some(id) = quote {
                draft = draft.quote_tweet_id(&parse_tweet_id(&id)?);
            }
            if !poll_options.is_empty() {
                draft = draft.poll(&poll_options, poll_minutes)?;
            }
            let resp = client.send_tweet(&draft).await?;
            print_line(&resp)?;
        }

        CliCommand::Delete { id_or_url } => {
            let tweet_id = parse_tweet_id(&id_or_url)?;
            let mut client = user_client(&config)?;
            let resp = client.delete_tweet(&tweet_id).await?;
            print_line(&resp)?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
