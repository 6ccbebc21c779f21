use anyhow::Context;
use phreddit_client::{
    api::{AdminNewUser, AuthToken, NewUser, UserId, Uuid},
    Client,
};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
struct UserInfo {
    /// Name displayed next to everything the user writes
    display_name: String,

    email: String,

    /// Initial password
    initial_password: String,

    #[structopt(long, default_value = "")]
    first_name: String,

    #[structopt(long, default_value = "")]
    last_name: String,
}

impl UserInfo {
    fn into_new_user(self) -> NewUser {
        // Both name fields are required by the server, default to the display name
        let or_display = |s: String| match s.is_empty() {
            true => self.display_name.clone(),
            false => s,
        };
        NewUser::new(
            UserId(Uuid::new_v4()),
            or_display(self.first_name),
            or_display(self.last_name),
            self.email,
            self.display_name,
            self.initial_password,
        )
    }
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a regular user
    CreateUser {
        #[structopt(flatten)]
        user: UserInfo,

        #[structopt(long, default_value = "100")]
        reputation: i64,
    },

    /// Create an administrator
    CreateAdmin {
        #[structopt(flatten)]
        user: UserInfo,
    },

    /// List all users
    ListUsers,
}

fn admin_token() -> anyhow::Result<AuthToken> {
    let tok =
        std::env::var("ADMIN_TOKEN").context("retrieving ADMIN_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing ADMIN_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let opt = <Opt as structopt::StructOpt>::from_args();

    let client = Client::new(opt.host);

    match opt.cmd {
        Command::CreateUser { user, reputation } => {
            let user = AdminNewUser {
                user: user.into_new_user(),
                reputation,
                is_admin: false,
            };
            client
                .admin_create_user(admin_token()?, &user)
                .await
                .with_context(|| format!("creating user {:?}", user.user.display_name))?;
            println!("{}", user.user.id.0);
        }
        Command::CreateAdmin { user } => {
            let user = AdminNewUser {
                user: user.into_new_user(),
                reputation: phreddit_client::api::ADMIN_REPUTATION,
                is_admin: true,
            };
            client
                .admin_create_user(admin_token()?, &user)
                .await
                .with_context(|| format!("creating admin {:?}", user.user.display_name))?;
            println!("{}", user.user.id.0);
        }
        Command::ListUsers => {
            for u in client.users().await.context("listing users")? {
                let admin = if u.is_admin { " (admin)" } else { "" };
                println!("{}\t{}\t{}{}", u.id.0, u.display_name, u.reputation, admin);
            }
        }
    }

    Ok(())
}
