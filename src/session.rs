use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::dataset::Dataset;
use crate::error::{KMeansError, Result};
use crate::kmeans::KMeansMiner;
use crate::model::{model_path, ModelFile};
use crate::protocol::{Frame, Request};
use crate::source::{is_valid_identifier, ConnectionParams, TableSource};

/// The model a session last computed or loaded, with the dataset it is bound to.
#[derive(Debug)]
struct ActiveModel {
    miner: KMeansMiner,
    dataset: Dataset,
}

/// Per-connection request dispatcher.
///
/// Holds the state one client builds up across requests: the recorded table,
/// the connection parameters and the active model. Socket I/O lives in the
/// server; a session only maps requests to reply frames.
pub struct Session {
    source: Arc<dyn TableSource>,
    config: Arc<ServerConfig>,
    table: Option<String>,
    params: ConnectionParams,
    active: Option<ActiveModel>,
}

fn parse_k(k: i64) -> Result<usize> {
    usize::try_from(k).map_err(|_| KMeansError::InvalidRequest(format!("Invalid k value: {}", k)))
}

fn check_identifier(kind: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(KMeansError::InvalidRequest(format!(
            "Invalid {} name '{}': only letters, digits and '_' are allowed",
            kind, name
        )))
    }
}

/// Status frame followed by the payload, or a single fault frame.
fn reply(result: Result<Vec<Frame>>) -> Vec<Frame> {
    match result {
        Ok(payload) => std::iter::once(Frame::ok()).chain(payload).collect(),
        Err(err) => {
            debug!(error = %err, "request failed");
            vec![Frame::from(&err)]
        }
    }
}

impl Session {
    pub fn new(source: Arc<dyn TableSource>, config: Arc<ServerConfig>) -> Self {
        let params = config.database.clone();
        Self {
            source,
            config,
            table: None,
            params,
            active: None,
        }
    }

    /// Connection parameters used for the next dataset build.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Execute one request and return the frames to send back (none for
    /// opcode 5).
    pub fn handle(&mut self, request: Request) -> Vec<Frame> {
        debug!(opcode = request.opcode(), "handling request");
        match request {
            Request::SetTable { table } => reply(self.set_table(table)),
            Request::Cluster { k } => reply(self.cluster(k)),
            Request::SaveModel {
                database,
                user,
                password,
            } => reply(self.save_model(ConnectionParams::new(database, user, password))),
            Request::LoadModel { database, table, k } => {
                reply(self.load_model(database, table, k))
            }
            Request::Schema => vec![Frame::Text(self.schema())],
            Request::SetCredentials {
                database,
                user,
                password,
            } => {
                self.params = ConnectionParams::new(database, user, password);
                info!(
                    database = %self.params.database,
                    user = %self.params.user,
                    "credentials updated"
                );
                Vec::new()
            }
        }
    }

    fn set_table(&mut self, table: String) -> Result<Vec<Frame>> {
        check_identifier("table", &table)?;
        debug!(table = %table, "table recorded");
        self.table = Some(table);
        Ok(Vec::new())
    }

    fn models_dir(&self) -> &Path {
        &self.config.storage.models_dir
    }

    fn cluster(&mut self, k: i64) -> Result<Vec<Frame>> {
        let table = self
            .table
            .clone()
            .ok_or_else(|| KMeansError::InvalidRequest("No table selected".to_string()))?;
        let k = parse_k(k)?;

        let dataset = Dataset::load(self.source.as_ref(), &self.params, &table)?;
        let mut miner = KMeansMiner::with_config(self.config.kmeans_config(k));
        let iterations = miner.run(&dataset)?;
        let report = miner.report(&dataset)?;
        info!(table = %table, k, iterations, rows = dataset.len(), "clustering finished");

        let path = model_path(self.models_dir(), None, &table, k);
        match miner.save(&path, &dataset, None) {
            Ok(()) => info!(path = %path.display(), "model saved"),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to save model"),
        }

        self.active = Some(ActiveModel { miner, dataset });
        Ok(vec![Frame::Text(report)])
    }

    fn save_model(&mut self, params: ConnectionParams) -> Result<Vec<Frame>> {
        let active = self.active.as_ref().ok_or(KMeansError::NotFitted)?;
        check_identifier("database", &params.database)?;

        // Authenticate only; the connection itself is not needed.
        self.source
            .connect(&params)
            .map_err(KMeansError::Connection)?;

        let path: PathBuf = model_path(
            self.models_dir(),
            Some(&params.database),
            active.dataset.table(),
            active.miner.k(),
        );
        active
            .miner
            .save(&path, &active.dataset, Some(&params.database))?;
        info!(path = %path.display(), "model saved");

        Ok(vec![Frame::Text(format!("Cluster saved in {}", path.display()))])
    }

    fn load_model(&mut self, database: String, table: String, k: i64) -> Result<Vec<Frame>> {
        check_identifier("table", &table)?;
        let database = if database.is_empty() {
            None
        } else {
            check_identifier("database", &database)?;
            Some(database)
        };
        let k = parse_k(k)?;

        let path = model_path(self.models_dir(), database.as_deref(), &table, k);
        let model = ModelFile::read(&path)?;
        if model.k as usize != k {
            return Err(KMeansError::ModelMismatch(format!(
                "{} holds {} clusters, {} requested",
                path.display(),
                model.k,
                k
            )));
        }

        let mut params = self.params.clone();
        if let Some(database) = &database {
            params.database = database.clone();
        }
        let dataset = Dataset::load(self.source.as_ref(), &params, &table)?;
        let miner = KMeansMiner::from_model(model, &dataset)?;
        let report = miner.describe(&dataset)?;
        info!(path = %path.display(), k = miner.k(), "model loaded");

        self.active = Some(ActiveModel { miner, dataset });
        Ok(vec![Frame::Text(report)])
    }

    /// Schema of the current table; empty when no table is known.
    fn schema(&self) -> String {
        if let Some(active) = &self.active {
            if self.table.as_deref().map_or(true, |t| t == active.dataset.table()) {
                return active.dataset.schema();
            }
        }

        let Some(table) = &self.table else {
            return String::new();
        };
        let columns = self
            .source
            .connect(&self.params)
            .and_then(|connection| connection.schema(table));
        match columns {
            Ok(columns) => columns.iter().map(|c| format!("{} ", c.name)).collect(),
            Err(err) => {
                debug!(table = %table, error = %err, "schema lookup failed");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;
    use crate::protocol::ErrorCode;
    use crate::source::{AccessPolicy, Column, ColumnKind, MemorySource};

    fn source() -> MemorySource {
        let rows = [1.0, 2.0, 3.0, 30.0, 31.0, 32.0]
            .into_iter()
            .enumerate()
            .map(|(i, x)| vec![Value::from(if i < 3 { "low" } else { "high" }), Value::from(x)])
            .collect();
        MemorySource::new()
            .with_rows("MapDB", "points", vec!["band".into(), "x".into()], rows)
            .unwrap()
            .with_table("MapDB", "empty", vec![Column::new("x", ColumnKind::Number)], vec![])
            .unwrap()
            .with_policy(AccessPolicy::default().allow("MapUser", "map"))
    }

    fn session(models_dir: &Path) -> Session {
        let mut config = ServerConfig::default();
        config.storage.models_dir = models_dir.to_path_buf();
        config.clustering.seed = Some(42);
        Session::new(Arc::new(source()), Arc::new(config))
    }

    fn fault_code(frames: &[Frame]) -> Option<ErrorCode> {
        match frames {
            [Frame::Fault { code, .. }] => Some(*code),
            _ => None,
        }
    }

    #[test]
    fn test_set_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());

        let frames = session.handle(Request::SetTable { table: "points".into() });
        assert_eq!(frames, vec![Frame::ok()]);
        assert_eq!(session.table(), Some("points"));

        let frames = session.handle(Request::SetTable { table: "../etc".into() });
        assert_eq!(fault_code(&frames), Some(ErrorCode::InvalidRequest));
        assert_eq!(session.table(), Some("points"));
    }

    #[test]
    fn test_cluster_requires_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let frames = session.handle(Request::Cluster { k: 2 });
        assert_eq!(fault_code(&frames), Some(ErrorCode::InvalidRequest));
    }

    #[test]
    fn test_cluster_replies_report_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session.handle(Request::SetTable { table: "points".into() });

        let frames = session.handle(Request::Cluster { k: 2 });
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Frame::ok());
        match &frames[1] {
            Frame::Text(report) => assert!(report.starts_with("\nNumber of iterations: ")),
            other => panic!("expected report text, got {:?}", other),
        }
        assert!(dir.path().join("points_2.dat").is_file());
    }

    #[test]
    fn test_cluster_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());

        session.handle(Request::SetTable { table: "points".into() });
        assert_eq!(
            fault_code(&session.handle(Request::Cluster { k: 7 })),
            Some(ErrorCode::OutOfRange)
        );
        assert_eq!(
            fault_code(&session.handle(Request::Cluster { k: -1 })),
            Some(ErrorCode::InvalidRequest)
        );

        session.handle(Request::SetTable { table: "missing".into() });
        let frames = session.handle(Request::Cluster { k: 2 });
        match &frames[..] {
            [Frame::Fault { code, message }] => {
                assert_eq!(*code, ErrorCode::Source);
                assert!(message.contains("doesn't exist"));
            }
            other => panic!("expected fault, got {:?}", other),
        }

        session.handle(Request::SetTable { table: "empty".into() });
        assert_eq!(
            fault_code(&session.handle(Request::Cluster { k: 1 })),
            Some(ErrorCode::EmptyTable)
        );
    }

    #[test]
    fn test_save_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());

        let save = |password: &str| Request::SaveModel {
            database: "MapDB".into(),
            user: "MapUser".into(),
            password: password.into(),
        };
        assert_eq!(
            fault_code(&session.handle(save("map"))),
            Some(ErrorCode::InvalidRequest)
        );

        session.handle(Request::SetTable { table: "points".into() });
        session.handle(Request::Cluster { k: 2 });

        assert_eq!(
            fault_code(&session.handle(save("wrong"))),
            Some(ErrorCode::Connection)
        );

        let frames = session.handle(save("map"));
        let path = dir.path().join("MapDB-points-2.dat");
        assert_eq!(
            frames,
            vec![
                Frame::ok(),
                Frame::text(format!("Cluster saved in {}", path.display()))
            ]
        );
        assert!(path.is_file());
    }

    #[test]
    fn test_load_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());

        let load = || Request::LoadModel {
            database: String::new(),
            table: "points".into(),
            k: 2,
        };
        assert_eq!(fault_code(&session.handle(load())), Some(ErrorCode::ModelNotFound));

        session.handle(Request::SetTable { table: "points".into() });
        let computed = session.handle(Request::Cluster { k: 2 });
        let Frame::Text(report) = &computed[1] else {
            panic!("expected report text");
        };

        let loaded = session.handle(load());
        assert_eq!(loaded[0], Frame::ok());
        let Frame::Text(details) = &loaded[1] else {
            panic!("expected details text");
        };
        assert!(report.ends_with(details.as_str()));
        assert!(details.starts_with("0:Centroid=("));
    }

    #[test]
    fn test_load_model_checks_cluster_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        session.handle(Request::SetTable { table: "points".into() });
        session.handle(Request::Cluster { k: 2 });

        std::fs::copy(dir.path().join("points_2.dat"), dir.path().join("points_3.dat")).unwrap();
        let frames = session.handle(Request::LoadModel {
            database: String::new(),
            table: "points".into(),
            k: 3,
        });
        assert_eq!(fault_code(&frames), Some(ErrorCode::ModelMismatch));
    }

    #[test]
    fn test_schema() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        assert_eq!(session.handle(Request::Schema), vec![Frame::text("")]);

        session.handle(Request::SetTable { table: "points".into() });
        assert_eq!(session.handle(Request::Schema), vec![Frame::text("band x ")]);

        session.handle(Request::SetTable { table: "missing".into() });
        assert_eq!(session.handle(Request::Schema), vec![Frame::text("")]);
    }

    #[test]
    fn test_set_credentials_is_silent_and_local() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path());
        let frames = session.handle(Request::SetCredentials {
            database: "MapDB".into(),
            user: "MapUser".into(),
            password: "wrong".into(),
        });
        assert!(frames.is_empty());
        assert_eq!(session.params().password, "wrong");

        session.handle(Request::SetTable { table: "points".into() });
        assert_eq!(
            fault_code(&session.handle(Request::Cluster { k: 2 })),
            Some(ErrorCode::Connection)
        );

        let other = Session::new(session.source.clone(), session.config.clone());
        assert_eq!(other.params().password, "map");
    }
}
