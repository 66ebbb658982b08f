// Copyright 2023 Remi Bernotavicius

use clap::Parser;
use clap::Subcommand;
use database::models::{CategoryId, DishType, IngredientId};
use simple_logger::SimpleLogger;

mod admin;
mod auth;
mod config;
mod database;
mod error;
mod forms;
mod pagination;
mod query;
mod server;
mod views;

pub use error::{Error, Result};

#[derive(Parser, Debug)]
#[command(about = "Tasty Ideas: a catalog of Japanese dishes with reviews")]
struct Args {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the site on BIND_ADDRESS.
    Serve,
    AddCategory {
        dish_type: DishType,
        #[arg(long)]
        image: Option<String>,
    },
    DeleteCategory {
        id: i32,
    },
    AddIngredient {
        name: String,
    },
    DeleteIngredient {
        id: i32,
    },
    CreateCook {
        username: String,
        password: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value_t = 0)]
        experience: i32,
    },
    DeleteCook {
        username: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = config::Config::load()?;
    SimpleLogger::new().with_level(config.log_level()).init()?;

    let mut conn = database::establish_connection(&config.database_path)?;
    match args.commands {
        Commands::Serve => tokio::runtime::Runtime::new()?.block_on(server::serve(conn, config))?,
        Commands::AddCategory { dish_type, image } => {
            admin::add_category(&mut conn, dish_type, image.as_deref())?;
        }
        Commands::DeleteCategory { id } => admin::delete_category(&mut conn, CategoryId::new(id))?,
        Commands::AddIngredient { name } => {
            admin::add_ingredient(&mut conn, &name)?;
        }
        Commands::DeleteIngredient { id } => {
            admin::delete_ingredient(&mut conn, IngredientId::new(id))?
        }
        Commands::CreateCook {
            username,
            password,
            first_name,
            last_name,
            email,
            experience,
        } => {
            admin::create_cook(
                &mut conn,
                &auth::Registration {
                    username: &username,
                    first_name: &first_name,
                    last_name: &last_name,
                    email: &email,
                    password: Some(&password),
                    experience,
                },
            )?;
        }
        Commands::DeleteCook { username } => admin::delete_cook(&mut conn, &username)?,
    }
    Ok(())
}
