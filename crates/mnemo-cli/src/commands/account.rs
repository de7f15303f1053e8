use mnemo_core::remote::bucket::BucketAccount;
use mnemo_core::remote::item_sync::ItemSyncAccount;
use mnemo_core::util::normalize_endpoint;
use mnemo_core::AccountConfig;

use crate::cli::AccountCommands;
use crate::commands::common::{Context, LOCAL_ACCOUNT};
use crate::error::CliError;

pub fn run_account(context: &Context, command: AccountCommands) -> Result<(), CliError> {
    let mut config = context.load_config()?;

    match command {
        AccountCommands::AddBucket {
            name,
            username,
            password,
            app_id,
            api_key,
            permanent_delete,
        } => {
            let mut account = BucketAccount::new(username, password, app_id, api_key);
            account.permanent_delete = permanent_delete;
            config.upsert_account(&name, AccountConfig::Bucket(account))?;
            println!("Added bucket account '{}'", name.trim());
        }
        AccountCommands::AddItemSync {
            name,
            server,
            email,
            password,
        } => {
            let server = normalize_endpoint(server)?;
            let account = ItemSyncAccount::new(server, email, password);
            config.upsert_account(&name, AccountConfig::ItemSync(account))?;
            println!("Added item-sync account '{}'", name.trim());
        }
        AccountCommands::AddOffline { name } => {
            config.upsert_account(&name, AccountConfig::Offline)?;
            println!("Added offline account '{}'", name.trim());
        }
        AccountCommands::Use { name } => {
            let name = name.trim().to_string();
            config.account(&name)?;
            println!("Active account: {name}");
            config.active_account = Some(name);
        }
        AccountCommands::List => {
            print_accounts(context, &config);
            return Ok(());
        }
        AccountCommands::Strategy { strategy } => {
            config.conflict_strategy = strategy.into();
            println!("Conflict strategy: {:?}", config.conflict_strategy);
        }
    }

    context.save_config(&config)
}

fn print_accounts(context: &Context, config: &mnemo_core::AppConfig) {
    if config.accounts.is_empty() {
        println!("No accounts configured; notes stay in the offline '{LOCAL_ACCOUNT}' store.");
        return;
    }

    let selected = config.resolve_account_name(context.account.as_deref());
    for (name, account) in &config.accounts {
        let marker = if selected.as_deref() == Some(name.as_str()) { '*' } else { ' ' };
        println!(
            "{marker} {name:<16} {:<10} {}",
            account.backend(),
            account.display_identifier()
        );
    }
}
