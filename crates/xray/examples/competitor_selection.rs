//! Traces a small competitor-selection pipeline and prints what was stored.
//!
//! Run with: cargo run --example competitor_selection
//!
//! Storage follows `XRAY_BACKEND` / `XRAY_TRACES_DIR` / `XRAY_SQLITE_PATH`
//! (default: JSON files under `.xray/traces`).

use anyhow::Result;
use xray::prelude::*;

struct Product {
    id: &'static str,
    title: &'static str,
    price: f64,
    rating: f64,
    reviews: u32,
}

const CATALOG: &[Product] = &[
    Product { id: "B0A1", title: "Steel Insulated Bottle 32oz", price: 27.5, rating: 4.6, reviews: 5400 },
    Product { id: "B0A2", title: "Glass Bottle 24oz", price: 18.0, rating: 4.1, reviews: 320 },
    Product { id: "B0A3", title: "Bottle Cleaning Brush", price: 7.0, rating: 4.8, reviews: 9100 },
    Product { id: "B0A4", title: "Vacuum Insulated Bottle 32oz", price: 31.0, rating: 3.6, reviews: 1200 },
    Product { id: "B0A5", title: "Insulated Bottle 32oz Sport", price: 24.0, rating: 4.4, reviews: 2100 },
];

const REFERENCE_PRICE: f64 = 29.99;
const MIN_RATING: f64 = 4.0;
const MIN_REVIEWS: u32 = 500;

fn evaluate(product: &Product) -> Candidate {
    let price_ok = product.price >= REFERENCE_PRICE * 0.5 && product.price <= REFERENCE_PRICE * 2.0;
    let rating_ok = product.rating >= MIN_RATING;
    let reviews_ok = product.reviews >= MIN_REVIEWS;

    Candidate::new(product.id, product.title)
        .metric("price", product.price)
        .metric("rating", product.rating)
        .metric("reviews", product.reviews)
        .evaluation(
            Evaluation::new("price", "Price range", price_ok, format!("${:.2}", product.price))
                .with_value(product.price),
        )
        .evaluation(
            Evaluation::new("rating", "Minimum rating", rating_ok, format!("{} vs {MIN_RATING}", product.rating))
                .with_value(product.rating),
        )
        .evaluation(
            Evaluation::new("reviews", "Minimum reviews", reviews_ok, format!("{} vs {MIN_REVIEWS}", product.reviews))
                .with_value(product.reviews),
        )
        .qualified(price_ok && rating_ok && reviews_ok)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .compact()
        .init();

    let store = xray::init(&XRayConfig::from_env()?)?;

    let mut trace = xray::trace("Competitor Selection")
        .with_description("Find a comparable product for the reference listing");
    trace.metadata(json!({"referenceProduct": "Insulated Steel Bottle 32oz", "referencePrice": REFERENCE_PRICE}));

    let keywords = vec!["insulated water bottle", "32oz water bottle"];
    trace
        .step("Keyword Generation", StepType::Llm)
        .input_described(json!({"title": "Insulated Steel Bottle 32oz"}), "Reference product")
        .output(json!({"keywords": keywords}))
        .reasoning("Extracted feature (insulated) and capacity (32oz) from the title")
        .metadata(json!({"model": "gpt-4", "temperature": 0.3}))
        .end();

    let found: Vec<&Product> = CATALOG.iter().filter(|p| p.title.contains("Bottle")).collect();
    trace
        .step("Candidate Search", StepType::Search)
        .input(json!({"keywords": keywords}))
        .output(json!({"count": found.len()}))
        .reasoning(format!("{} catalog items matched the keywords", found.len()))
        .end();

    let candidates: Vec<Candidate> = found.iter().map(|p| evaluate(p)).collect();
    let qualified: Vec<Candidate> = candidates.iter().filter(|c| c.qualified).cloned().collect();
    trace
        .step("Apply Filters", StepType::Filter)
        .input(json!({"count": candidates.len()}))
        .output(json!({"qualified": qualified.len()}))
        .filters(vec![
            Filter::new("price_range", "0.5x to 2x reference price", json!([REFERENCE_PRICE * 0.5, REFERENCE_PRICE * 2.0])),
            Filter::new("min_rating", "rating >= 4.0", MIN_RATING),
            Filter::new("min_reviews", "reviews >= 500", MIN_REVIEWS),
        ])
        .candidates(candidates)
        .reasoning(format!("{} candidates passed every filter", qualified.len()))
        .end();

    let Some(best) = qualified.iter().max_by_key(|c| c.metrics["reviews"].as_u64().unwrap_or(0)) else {
        let trace = trace.fail("No candidate passed the filters").await?;
        println!("Trace {} failed", trace.id);
        return Ok(());
    };

    let best_id = best.id.clone();
    let ranked: Vec<Candidate> = qualified
        .iter()
        .cloned()
        .map(|c| {
            let chosen = c.id == best_id;
            c.selected(chosen)
        })
        .collect();
    trace
        .step("Rank & Select", StepType::Rank)
        .input(json!({"count": ranked.len()}))
        .output_described(json!({"selected": best_id}), "Most reviewed qualified candidate")
        .candidates(ranked)
        .reasoning("Ranked qualified candidates by review count")
        .end();

    let summary = format!("Selected {}", best.label);
    let trace = trace
        .end(Some(TraceResult::success(summary).with_data(json!({"id": best_id}))))
        .await?;

    println!("Recorded traces:");
    for summary in store.list()? {
        println!(
            "  {} {:<24} {:<9} {} steps",
            summary.start_time.format("%Y-%m-%d %H:%M:%S"),
            summary.name,
            summary.status,
            summary.steps_count
        );
    }
    println!("\nLatest trace:\n{}", serde_json::to_string_pretty(&trace)?);

    Ok(())
}
