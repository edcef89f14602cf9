//! Basic example: cluster the play-tennis table through an in-process server
//!
//! Run with: cargo run --example basic --release

use std::sync::Arc;
use std::thread;

use kmeans_server::source::AccessPolicy;
use kmeans_server::{Client, KMeansServer, MemorySource, ServerConfig, Value};

fn playtennis() -> MemorySource {
    let raw = [
        ("sunny", 85.0, 85.0, "false", "no"),
        ("sunny", 80.0, 90.0, "true", "no"),
        ("overcast", 83.0, 86.0, "false", "yes"),
        ("rain", 70.0, 96.0, "false", "yes"),
        ("rain", 68.0, 80.0, "false", "yes"),
        ("rain", 65.0, 70.0, "true", "no"),
        ("overcast", 64.0, 65.0, "true", "yes"),
        ("sunny", 72.0, 95.0, "false", "no"),
        ("sunny", 69.0, 70.0, "false", "yes"),
        ("rain", 75.0, 80.0, "false", "yes"),
        ("sunny", 75.0, 70.0, "true", "yes"),
        ("overcast", 72.0, 90.0, "true", "yes"),
        ("overcast", 81.0, 75.0, "false", "yes"),
        ("rain", 71.0, 91.0, "true", "no"),
    ];
    let rows = raw
        .iter()
        .map(|&(outlook, temperature, humidity, windy, play)| {
            vec![
                Value::from(outlook),
                Value::from(temperature),
                Value::from(humidity),
                Value::from(windy),
                Value::from(play),
            ]
        })
        .collect();
    let columns = ["outlook", "temperature", "humidity", "windy", "play"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    MemorySource::new()
        .with_rows("MapDB", "playtennis", columns, rows)
        .expect("valid table")
        .with_policy(AccessPolicy::default().allow("MapUser", "map"))
}

fn main() {
    println!("=== kmeans-server example ===\n");

    let models = std::env::temp_dir().join("kmeans-server-demo");
    let mut config = ServerConfig::default();
    config.storage.models_dir = models.clone();
    config.clustering.seed = Some(42);

    let server = KMeansServer::bind("127.0.0.1:0", Arc::new(playtennis()), Arc::new(config))
        .expect("Failed to bind");
    let addr = server.local_addr().expect("Failed to read address");
    thread::spawn(move || server.run());
    println!("Server listening on {}\n", addr);

    let mut client = Client::connect(addr).expect("Failed to connect");
    client.set_table("playtennis").expect("Failed to set table");
    println!("Schema: {}", client.schema().expect("Failed to read schema"));

    let k = 3;
    println!("Running k-means with k={}...", k);
    let report = client.cluster(k).expect("Clustering failed");
    println!("{}", report);

    let saved = client
        .save_model("MapDB", "MapUser", "map")
        .expect("Failed to save model");
    println!("{}\n", saved);

    println!("Reloading the saved model:");
    let details = client
        .load_model("MapDB", "playtennis", k)
        .expect("Failed to load model");
    println!("{}", details);

    println!("Models written to {}", models.display());
    println!("\n=== Done! ===");
}
