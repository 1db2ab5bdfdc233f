use anyhow::{anyhow, Context, Result};
use catalog_cache::catalog::config::parse_header_list;
use catalog_cache::util::env;
use catalog_cache::{telemetry, CatalogClient, CatalogConfig, CatalogError, SearchFilter};
use clap::{Args, Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "catalog", version, about = "Storefront catalog lookups through the dedup cache")]
struct Cli {
    /// Override CATALOG_BASE_URL
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Look up one product by product id
    Product { id: String },
    /// Look up the product owning a sku id
    Sku { id: String },
    /// Look up several product ids (keyed by product id)
    Products {
        #[arg(required = true, value_delimiter = ',')]
        ids: Vec<String>,
    },
    /// Look up several sku ids (keyed by owning product id)
    Skus {
        #[arg(required = true, value_delimiter = ',')]
        ids: Vec<String>,
    },
    /// Raw filter search, e.g. `search productId:1 skuId:7`
    Search(FilterArgs),
    /// Category / price search; the `map` hint is derived from the clauses
    Category(FilterArgs),
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Filter clauses (`fq`)
    #[arg(required = true)]
    fq: Vec<String>,
    /// Sort order, e.g. OrderByPriceASC
    #[arg(long)]
    order: Option<String>,
    /// Free text
    #[arg(long)]
    text: Option<String>,
    /// Sales channel
    #[arg(long)]
    sc: Option<String>,
    /// Extra request headers as `k=v;k2=v2`
    #[arg(long)]
    headers: Option<String>,
}

impl FilterArgs {
    fn filter(&self) -> SearchFilter {
        let mut f = SearchFilter::new(self.fq.iter().cloned());
        f.order = self.order.clone();
        f.text = self.text.clone();
        f.sales_channel = self.sc.clone();
        f
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        let Some(raw) = &self.headers else {
            return Ok(map);
        };
        for (k, v) in parse_header_list(raw) {
            let name = HeaderName::from_bytes(k.as_bytes())
                .with_context(|| format!("invalid header name {k}"))?;
            let value =
                HeaderValue::from_str(&v).with_context(|| format!("invalid header value for {k}"))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    telemetry::init_tracing("info,catalog_cache=info")?;
    let cli = Cli::parse();

    env::preflight_check(
        "catalog",
        &[],
        &[
            "CATALOG_BASE_URL",
            "CATALOG_PAGE_SIZE",
            "CATALOG_RETRY_ATTEMPTS",
            "CATALOG_TIMEOUT_SECS",
            "CATALOG_SALES_CHANNEL",
            "CATALOG_EXTRA_HEADERS",
        ],
    )?;

    let mut cfg = CatalogConfig::from_env();
    if let Some(url) = cli.base_url {
        cfg = cfg.with_base_url(url);
    }
    info!(base_url = %cfg.base_url, page_size = cfg.page_size, "catalog client ready");
    let client = CatalogClient::new(cfg).context("failed to build catalog client")?;

    match cli.command {
        Commands::Product { id } => {
            let product = client
                .search_product(&id)
                .await?
                .ok_or_else(|| anyhow!("product {id} not found"))?;
            print_json(&*product)?;
        }
        Commands::Sku { id } => {
            let product = client
                .search_sku(&id)
                .await?
                .ok_or_else(|| anyhow!("sku {id} not found"))?;
            print_json(&*product)?;
        }
        Commands::Products { ids } => print_json(&client.search_product_array(ids).await?)?,
        Commands::Skus { ids } => print_json(&client.search_sku_array(ids).await?)?,
        Commands::Search(args) => {
            let headers = args.header_map()?;
            match client.search(&args.filter(), headers).await {
                Ok(products) => print_json(&products)?,
                Err(CatalogError::EmptyResult { clauses }) => {
                    print_json(&Vec::<()>::new())?;
                    info!(empty = ?clauses.iter().map(|c| c.as_str()).collect::<Vec<_>>(), "no matches");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Category(args) => print_json(&client.search_category(&args.filter()).await?)?,
    }
    Ok(())
}
