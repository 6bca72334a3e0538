use clap::Subcommand;

use super::{open_db, print_json};

#[derive(Subcommand)]
pub enum CatalogAction {
    /// Register a habit for a user
    Add {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        habit: i64,
    },
    /// List a user's registered habit IDs
    List {
        #[arg(long)]
        user: i64,
    },
}

pub fn run(action: CatalogAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_db()?;

    match action {
        CatalogAction::Add { user, habit } => {
            db.register_habit(user, habit)?;
            println!("ok");
        }
        CatalogAction::List { user } => {
            print_json(&db.catalog(user)?)?;
        }
    }
    Ok(())
}
