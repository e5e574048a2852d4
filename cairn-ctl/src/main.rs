use anyhow::Context;
use cairn_api::{AuthToken, ChangesetId, NewChangeset, NewSession, NewUser, UserId, Uuid};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a user (needs ADMIN_TOKEN)
    CreateUser {
        /// Numeric user id
        id: i64,

        /// Display name
        name: String,

        /// Maximum number of changeset comments in any trailing hour
        #[structopt(long, default_value = "10")]
        max_comments_per_hour: i64,

        #[structopt(long)]
        moderator: bool,

        /// Do not mark the user's edits as public
        #[structopt(long)]
        private: bool,
    },

    /// Open a session for a user and print its token (needs ADMIN_TOKEN)
    CreateSession { user: i64 },

    /// Register a changeset (needs ADMIN_TOKEN)
    CreateChangeset {
        id: i64,
        owner: i64,

        /// Leave the changeset open
        #[structopt(long)]
        open: bool,
    },

    /// Comment on a closed changeset (needs CAIRN_TOKEN)
    Comment { changeset: i64, text: String },

    /// Hide a comment (needs a moderator's CAIRN_TOKEN)
    Hide { comment: i64 },

    /// Restore a hidden comment (needs a moderator's CAIRN_TOKEN)
    Unhide { comment: i64 },

    /// Show a changeset with its comments
    Show { changeset: i64 },
}

fn token_from_env(var: &str) -> anyhow::Result<AuthToken> {
    let tok = std::env::var(var).with_context(|| format!("retrieving {var} environment variable"))?;
    let tok = Uuid::try_parse(&tok).with_context(|| format!("parsing {var} as an auth token"))?;
    Ok(AuthToken(tok))
}

async fn send(req: reqwest::RequestBuilder) -> anyhow::Result<serde_json::Value> {
    let resp = req.send().await.context("sending request")?;
    let status = resp.status();
    let body = resp.bytes().await.context("reading response body")?;
    if !status.is_success() {
        return Err(match cairn_api::Error::parse(&body) {
            Ok(err) => anyhow::Error::new(err),
            Err(_) => anyhow::anyhow!("server answered {status}"),
        });
    }
    if body.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_slice(&body).context("parsing response body")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();

    let client = reqwest::Client::new();
    let url = |path: &str| format!("{}{}", opt.host, path);

    let res = match opt.cmd {
        Command::CreateUser {
            id,
            name,
            max_comments_per_hour,
            moderator,
            private,
        } => {
            send(
                client
                    .post(url("/api/admin/create-user"))
                    .json(&NewUser {
                        id: UserId(id),
                        name,
                        max_changeset_comments_per_hour: max_comments_per_hour,
                        moderator,
                        data_public: !private,
                    })
                    .bearer_auth(token_from_env("ADMIN_TOKEN")?.0),
            )
            .await?
        }
        Command::CreateSession { user } => {
            send(
                client
                    .post(url("/api/admin/create-session"))
                    .json(&NewSession { user: UserId(user) })
                    .bearer_auth(token_from_env("ADMIN_TOKEN")?.0),
            )
            .await?
        }
        Command::CreateChangeset { id, owner, open } => {
            send(
                client
                    .post(url("/api/admin/create-changeset"))
                    .json(&NewChangeset {
                        id: ChangesetId(id),
                        owner: UserId(owner),
                        open,
                    })
                    .bearer_auth(token_from_env("ADMIN_TOKEN")?.0),
            )
            .await?
        }
        Command::Comment { changeset, text } => {
            send(
                client
                    .post(url(&format!("/api/0.6/changeset/{changeset}/comment")))
                    .form(&[("text", text)])
                    .bearer_auth(token_from_env("CAIRN_TOKEN")?.0),
            )
            .await?
        }
        Command::Hide { comment } => {
            send(
                client
                    .post(url(&format!("/api/0.6/changeset/comment/{comment}/hide")))
                    .bearer_auth(token_from_env("CAIRN_TOKEN")?.0),
            )
            .await?
        }
        Command::Unhide { comment } => {
            send(
                client
                    .post(url(&format!("/api/0.6/changeset/comment/{comment}/unhide")))
                    .bearer_auth(token_from_env("CAIRN_TOKEN")?.0),
            )
            .await?
        }
        Command::Show { changeset } => {
            send(client.get(url(&format!("/api/0.6/changeset/{changeset}")))).await?
        }
    };

    if !res.is_null() {
        println!(
            "{}",
            serde_json::to_string_pretty(&res).context("pretty-printing response")?
        );
    }

    Ok(())
}
