use std::{str::FromStr, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use saree_storefront::{
    auth::{roles, AuthService},
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::{OrderModel, OrderStatus, ProductModel},
    events::{self, EventSender},
    services::{
        allocation::AllocationRequest,
        products::{NewProduct, ProductQuery},
        AppServices,
    },
};
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(config.log_level(), config.log_json);

    match cli.command {
        Commands::Migrate => run_migrate(&config).await?,
        Commands::IssueToken(args) => handle_issue_token(&config, args, cli.json)?,
        Commands::Products(command) => {
            let context = CliContext::initialize(&config).await?;
            let outcome = handle_products_command(&context, command, cli.json).await;
            context.shutdown().await;
            outcome?;
        }
        Commands::Orders(command) => {
            let context = CliContext::initialize(&config).await?;
            let outcome = handle_orders_command(&context, command, cli.json).await;
            context.shutdown().await;
            outcome?;
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "storefront-cli",
    about = "Operate the saree storefront from the terminal",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Sign an access token for a user id
    IssueToken(IssueTokenArgs),
    #[command(subcommand)]
    Products(ProductCommands),
    #[command(subcommand)]
    Orders(OrderCommands),
}

#[derive(Args)]
struct IssueTokenArgs {
    #[arg(long, help = "Subject (user id) the token is issued for")]
    sub: String,
    #[arg(long = "role", help = "Role to grant; repeat for several")]
    roles: Vec<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    email: Option<String>,
}

#[derive(Subcommand)]
enum ProductCommands {
    /// Search the catalog
    List(ProductListArgs),
    /// Show one product by id or tracking id
    Get { id: String },
    /// Create an online-only product with its whole stock on the web
    Create(ProductCreateArgs),
}

#[derive(Args)]
struct ProductListArgs {
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    fabric: Option<String>,
    #[arg(long)]
    occasion: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    color: Option<String>,
    #[arg(long)]
    min_price: Option<Decimal>,
    #[arg(long)]
    max_price: Option<Decimal>,
}

#[derive(Args)]
struct ProductCreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    fabric: String,
    #[arg(long)]
    color: String,
    #[arg(long)]
    occasion: String,
    #[arg(long)]
    category: String,
    #[arg(long, help = "Unit price, e.g. 2499.00")]
    price: String,
    #[arg(long)]
    stock: i32,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    image_url: Option<String>,
}

#[derive(Subcommand)]
enum OrderCommands {
    /// List orders, optionally filtered by status
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Advance an order to the next status
    SetStatus { id: Uuid, status: String },
}

struct CliContext {
    services: AppServices,
    db: Arc<DbPool>,
    event_task: JoinHandle<()>,
}

impl CliContext {
    async fn initialize(config: &AppConfig) -> Result<Self> {
        let db_pool = db::establish_connection_from_app_config(config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        Ok(Self {
            services: AppServices::new(db.clone(), event_sender),
            db,
            event_task,
        })
    }

    /// Drops the services so the event processor can drain before exit.
    async fn shutdown(self) {
        let Self {
            services,
            db,
            event_task,
        } = self;
        drop(services);
        let _ = event_task.await;
        if let Ok(pool) = Arc::try_unwrap(db) {
            db::close_pool(pool).await;
        }
    }
}

async fn run_migrate(config: &AppConfig) -> Result<()> {
    let pool = db::establish_connection_from_app_config(config)
        .await
        .context("failed to connect to database")?;
    db::run_migrations(&pool)
        .await
        .context("failed to apply migrations")?;
    db::close_pool(pool).await;
    println!("Migrations applied");
    Ok(())
}

fn handle_issue_token(config: &AppConfig, args: IssueTokenArgs, json: bool) -> Result<()> {
    if let Some(unknown) = args.roles.iter().find(|role| !roles::is_known(role)) {
        return Err(anyhow!("unknown role '{}'", unknown));
    }

    let auth = AuthService::new(config.into());
    let token = auth
        .issue_token(&args.sub, args.name, args.email, args.roles)
        .context("failed to issue token")?;

    if json {
        print_json(&token)?;
    } else {
        println!("{}", token.access_token);
    }
    Ok(())
}

async fn handle_products_command(
    context: &CliContext,
    command: ProductCommands,
    json: bool,
) -> Result<()> {
    let products = &context.services.products;
    match command {
        ProductCommands::List(args) => {
            let query = ProductQuery {
                search: args.search,
                fabric: args.fabric,
                occasion: args.occasion,
                category: args.category,
                color: args.color,
                min_price: args.min_price,
                max_price: args.max_price,
            };
            let found = products.search(query).await.context("product search failed")?;
            if json {
                print_json(&found)?;
            } else if found.is_empty() {
                println!("No products match");
            } else {
                found.iter().for_each(render_product);
            }
        }
        ProductCommands::Get { id } => {
            let product = match Uuid::from_str(&id) {
                Ok(uuid) => products.get(uuid).await,
                Err(_) => products.get_by_tracking_id(&id).await,
            }
            .with_context(|| format!("failed to load product {}", id))?;
            if json {
                print_json(&product)?;
            } else {
                render_product(&product);
            }
        }
        ProductCommands::Create(args) => {
            let input = NewProduct {
                tracking_id: None,
                name: args.name,
                description: args.description,
                fabric: args.fabric,
                color: args.color,
                occasion: args.occasion,
                category: args.category,
                price: args.price,
                image_url: args.image_url,
                allocation: AllocationRequest::online_only(args.stock),
            };
            let (product, _) = products
                .create(input)
                .await
                .context("failed to create product")?
                .into_parts();
            if json {
                print_json(&product)?;
            } else {
                println!("Created product {} ({})", product.tracking_id, product.id);
            }
        }
    }
    Ok(())
}

async fn handle_orders_command(
    context: &CliContext,
    command: OrderCommands,
    json: bool,
) -> Result<()> {
    match command {
        OrderCommands::List { status } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let orders = context
                .services
                .checkout
                .list_all(status)
                .await
                .context("failed to list orders")?;
            if json {
                print_json(&orders)?;
            } else if orders.is_empty() {
                println!("No orders found");
            } else {
                orders.iter().for_each(render_order);
            }
        }
        OrderCommands::SetStatus { id, status } => {
            let target = parse_status(&status)?;
            let (order, _) = context
                .services
                .lifecycle
                .transition(id, target)
                .await
                .with_context(|| format!("failed to move order {} to {}", id, status))?
                .into_parts();
            if json {
                print_json(&order)?;
            } else {
                render_order(&order);
            }
        }
    }
    Ok(())
}

fn parse_status(raw: &str) -> Result<OrderStatus> {
    OrderStatus::from_str(&raw.trim().to_ascii_lowercase())
        .map_err(|_| anyhow!("unknown order status '{}' (pending, shipped, delivered)", raw))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_product(product: &ProductModel) {
    println!(
        "- {} • {} • {} {} • ₹{} • {} in stock of {}",
        product.tracking_id,
        product.name,
        product.color,
        product.fabric,
        product.price,
        product.in_stock,
        product.total_stock
    );
}

fn render_order(order: &OrderModel) {
    println!(
        "- Order {} • {} • status {} • total ₹{} • {} line(s)",
        order.id,
        order.customer_name,
        order.status.as_ref(),
        order.total_amount,
        order.items.lines().len()
    );
}
