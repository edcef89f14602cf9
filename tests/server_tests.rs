use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;

use kmeans_server::protocol::{read_frame, write_frame, ErrorCode, Frame, ProtocolError};
use kmeans_server::source::AccessPolicy;
use kmeans_server::{Client, ClientError, KMeansServer, MemorySource, ServerConfig, Value};
use tempfile::TempDir;

fn points_source() -> MemorySource {
    let rows = [1.0, 2.0, 3.0, 40.0, 41.0, 42.0]
        .into_iter()
        .enumerate()
        .map(|(i, x)| vec![Value::from(if i < 3 { "low" } else { "high" }), Value::from(x)])
        .collect();
    MemorySource::new()
        .with_rows("MapDB", "points", vec!["band".into(), "x".into()], rows)
        .unwrap()
        .with_policy(AccessPolicy::default().allow("MapUser", "map"))
}

/// Start a server on an ephemeral port; the models directory lives as long as
/// the returned guard.
fn start_server() -> (SocketAddr, TempDir) {
    let models = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.storage.models_dir = models.path().to_path_buf();
    config.clustering.seed = Some(42);

    let server =
        KMeansServer::bind("127.0.0.1:0", Arc::new(points_source()), Arc::new(config)).unwrap();
    let addr = server.local_addr().unwrap();
    thread::spawn(move || {
        let _ = server.run();
    });
    (addr, models)
}

fn fault_code(result: Result<impl std::fmt::Debug, ClientError>) -> ErrorCode {
    match result {
        Err(ClientError::Fault { code, .. }) => code,
        other => panic!("expected a fault, got {:?}", other),
    }
}

// ============================================================================
// Clustering Tests
// ============================================================================

#[test]
fn test_cluster_over_tcp() {
    let (addr, models) = start_server();
    let mut client = Client::connect(addr).unwrap();

    client.set_table("points").unwrap();
    let report = client.cluster(2).unwrap();

    assert!(report.starts_with("\nNumber of iterations: "));
    assert!(report.contains("0:Centroid=("));
    assert!(report.contains("1:Centroid=("));
    assert!(models.path().join("points_2.dat").is_file());
}

#[test]
fn test_cluster_missing_table_keeps_session() {
    let (addr, _models) = start_server();
    let mut client = Client::connect(addr).unwrap();

    client.set_table("nothing").unwrap();
    match client.cluster(2) {
        Err(ClientError::Fault { code, message }) => {
            assert_eq!(code, ErrorCode::Source);
            assert!(message.contains("doesn't exist"));
        }
        other => panic!("expected a fault, got {:?}", other),
    }

    client.set_table("points").unwrap();
    assert!(client.cluster(1).is_ok());
}

#[test]
fn test_cluster_invalid_k() {
    let (addr, _models) = start_server();
    let mut client = Client::connect(addr).unwrap();
    client.set_table("points").unwrap();

    assert_eq!(fault_code(client.cluster(0)), ErrorCode::OutOfRange);
    assert_eq!(fault_code(client.cluster(100)), ErrorCode::OutOfRange);
    assert_eq!(fault_code(client.cluster(-3)), ErrorCode::InvalidRequest);
}

#[test]
fn test_set_table_rejects_bad_names() {
    let (addr, _models) = start_server();
    let mut client = Client::connect(addr).unwrap();
    assert_eq!(
        fault_code(client.set_table("points; drop table")),
        ErrorCode::InvalidRequest
    );
}

// ============================================================================
// Model Persistence Tests
// ============================================================================

#[test]
fn test_save_and_load_model() {
    let (addr, models) = start_server();
    let mut client = Client::connect(addr).unwrap();

    assert_eq!(
        fault_code(client.save_model("MapDB", "MapUser", "map")),
        ErrorCode::InvalidRequest
    );

    client.set_table("points").unwrap();
    let report = client.cluster(2).unwrap();

    assert_eq!(
        fault_code(client.save_model("MapDB", "MapUser", "bad")),
        ErrorCode::Connection
    );

    let saved = client.save_model("MapDB", "MapUser", "map").unwrap();
    let path = models.path().join("MapDB-points-2.dat");
    assert_eq!(saved, format!("Cluster saved in {}", path.display()));
    assert!(path.is_file());

    let details = client.load_model("MapDB", "points", 2).unwrap();
    assert!(details.starts_with("0:Centroid=("));
    assert!(report.ends_with(&details));

    let unqualified = client.load_model("", "points", 2).unwrap();
    assert_eq!(unqualified, details);
}

#[test]
fn test_load_missing_model_keeps_session() {
    let (addr, _models) = start_server();
    let mut client = Client::connect(addr).unwrap();

    assert_eq!(
        fault_code(client.load_model("", "points", 3)),
        ErrorCode::ModelNotFound
    );

    client.set_table("points").unwrap();
    assert!(client.cluster(3).is_ok());
    assert!(client.load_model("", "points", 3).is_ok());
}

// ============================================================================
// Session State Tests
// ============================================================================

#[test]
fn test_schema() {
    let (addr, _models) = start_server();
    let mut client = Client::connect(addr).unwrap();

    assert_eq!(client.schema().unwrap(), "");
    client.set_table("points").unwrap();
    assert_eq!(client.schema().unwrap(), "band x ");
    client.set_table("nothing").unwrap();
    assert_eq!(client.schema().unwrap(), "");
}

#[test]
fn test_credentials_are_per_session() {
    let (addr, _models) = start_server();
    let mut first = Client::connect(addr).unwrap();
    let mut second = Client::connect(addr).unwrap();

    first.set_credentials("MapDB", "MapUser", "wrong").unwrap();
    first.set_table("points").unwrap();
    assert_eq!(fault_code(first.cluster(2)), ErrorCode::Connection);

    second.set_table("points").unwrap();
    assert!(second.cluster(2).is_ok());

    first.set_credentials("MapDB", "MapUser", "map").unwrap();
    assert!(first.cluster(2).is_ok());
}

#[test]
fn test_unknown_opcode_ends_session() {
    let (addr, _models) = start_server();
    let stream = TcpStream::connect(addr).unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = stream;

    write_frame(&mut writer, &Frame::Int(99)).unwrap();
    writer.flush().unwrap();

    match read_frame(&mut reader).unwrap() {
        Frame::Fault { code, .. } => assert_eq!(code, ErrorCode::Protocol),
        other => panic!("expected a protocol fault, got {:?}", other),
    }
    assert!(matches!(
        read_frame(&mut reader),
        Err(ProtocolError::Disconnected)
    ));

    let mut client = Client::connect(addr).unwrap();
    assert!(client.set_table("points").is_ok());
}
