//! Basic example demonstrating typed calls against a public API.
//!
//! This example shows how to:
//! - Create a client with basic configuration
//! - Make GET and POST requests
//! - Access response data and transaction metadata
//!
//! Run with: `cargo run --example storefront`

use seawall::{Client, Error};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter("seawall=debug,storefront=info")
        .init();

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .default_header("User-Agent", "seawall-demo/0.1")?
        .build()?;

    println!("=== GET Request Example ===");
    let response = client.get::<Post>("/posts/1").await?;
    println!("Post ID: {}", response.data.id);
    println!("Title: {}", response.data.title);
    println!("Latency: {:?}", response.latency);
    println!("Status: {}", response.status);
    println!();

    println!("=== POST Request Example ===");
    let new_post = NewPost {
        title: "My New Post".to_string(),
        body: "This is the content of my new post!".to_string(),
        user_id: 1,
    };
    let created = client.post::<NewPost, Post>("/posts", &new_post).await?;
    println!("Created post with ID: {}", created.data.id);
    println!("Attempts: {}", created.attempts);

    Ok(())
}
