//! Scripted demo session.
//!
//! Registers a typed `Point` class and a `Segment` schema nesting two points,
//! loads an identity table, and drives a few mutations through one listener.
//! Each tick yields one [`Transcript`] holding both encodings.

use std::sync::Arc;

use anyhow::Context;
use define_core::{
    observe, CompactCommit, DefineError, IdentityTable, Listener, ManualScheduler, PlainFactory,
    PrettyCommit, Registry, RegistryConfig, SchemaClass, SchemaDescription, Scheduler,
    SharedObject, TokioScheduler,
};
use serde_json::json;
use tokio::sync::mpsc;

/// Name the demo registers its point class under.
pub const POINT: &str = "demo.geo.Point";
/// Name the demo registers its segment schema under.
pub const SEGMENT: &str = "demo.geo.Segment";

/// Options for [`run`].
#[derive(Debug, Clone, Default)]
pub struct DemoOptions {
    /// Registry configuration.
    pub config: RegistryConfig,
    /// Table to load; the built-in one when `None`.
    pub table: Option<IdentityTable>,
    /// Flush through [`ManualScheduler`] instead of [`TokioScheduler`].
    pub manual: bool,
}

/// Both encodings of one flushed commit, rendered as JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Compact form, one line.
    pub compact: String,
    /// Pretty form, indented.
    pub pretty: String,
}

/// A 2D point backed by a shared object.
#[derive(Debug, Clone)]
pub struct Point(SharedObject);

impl SchemaClass for Point {
    fn describe() -> SchemaDescription {
        SchemaDescription::new().primitive("x").primitive("y")
    }

    fn wrap(object: SharedObject) -> Self {
        Self(object)
    }

    fn object(&self) -> &SharedObject {
        &self.0
    }
}

impl Point {
    /// Set the x coordinate.
    ///
    /// # Errors
    ///
    /// Propagates accessor errors.
    pub fn set_x(&self, x: i64) -> anyhow::Result<()> {
        Ok(self.0.set("x", x)?)
    }

    /// Set the y coordinate.
    ///
    /// # Errors
    ///
    /// Propagates accessor errors.
    pub fn set_y(&self, y: i64) -> anyhow::Result<()> {
        Ok(self.0.set("y", y)?)
    }
}

/// Identity table used when none is given.
#[must_use]
pub fn builtin_table() -> IdentityTable {
    [(POINT, 1), (SEGMENT, 2)].into_iter().collect()
}

type Commit = (CompactCommit, PrettyCommit);

enum Driver {
    Manual(Arc<ManualScheduler>),
    Tokio(mpsc::UnboundedReceiver<DefineError>),
}

struct Session {
    driver: Driver,
    commits: mpsc::UnboundedReceiver<Commit>,
    listener: Listener,
}

impl Session {
    fn new(manual: bool) -> anyhow::Result<Self> {
        let (tx, commits) = mpsc::unbounded_channel();
        let (scheduler, driver): (Arc<dyn Scheduler>, Driver) = if manual {
            let scheduler = Arc::new(ManualScheduler::new());
            (scheduler.clone(), Driver::Manual(scheduler))
        } else {
            let (scheduler, errors) = TokioScheduler::current()
                .context("the tokio scheduler needs a running runtime")?
                .with_error_channel();
            (Arc::new(scheduler), Driver::Tokio(errors))
        };
        let listener = Listener::new(scheduler, move |compact, pretty| {
            if tx.send((compact.clone(), pretty.clone())).is_err() {
                tracing::trace!("demo session ended, dropping commit");
            }
        });
        Ok(Self {
            driver,
            commits,
            listener,
        })
    }

    /// Wait for the pending flush and render its commit.
    async fn settle(&mut self) -> anyhow::Result<Transcript> {
        let (compact, pretty) = match &mut self.driver {
            Driver::Manual(scheduler) => {
                scheduler.run_tick()?;
                self.commits.try_recv().context("tick produced no commit")?
            }
            Driver::Tokio(errors) => tokio::select! {
                Some(commit) = self.commits.recv() => commit,
                Some(err) = errors.recv() => return Err(err.into()),
                else => anyhow::bail!("listener dropped before flushing"),
            },
        };
        Ok(Transcript {
            compact: compact.to_json()?,
            pretty: pretty.to_json()?,
        })
    }
}

/// Run the scripted session and collect one transcript per tick.
///
/// # Errors
///
/// Fails on registration or consistency errors, or when a flush fails.
pub async fn run(options: DemoOptions) -> anyhow::Result<Vec<Transcript>> {
    let mut registry = Registry::with_config(options.config);
    let points = registry.register_schema_class::<Point>(POINT)?;
    let segment_schema = registry.schema(
        SEGMENT,
        &SchemaDescription::new()
            .primitive("label")
            .nested("from", points.schema())
            .nested("to", points.schema()),
    )?;
    let segments = PlainFactory::for_schema(segment_schema);

    let table = options.table.unwrap_or_else(builtin_table);
    registry.load_identity_table(&table);
    registry.freeze().context("identity table does not match the demo definitions")?;
    tracing::info!(definitions = registry.len(), "demo registry ready");

    let mut session = Session::new(options.manual)?;
    let mut transcripts = Vec::new();

    let p = points.create([("x", 0), ("y", 0)])?;
    observe::attach(p.object(), &[session.listener.clone()]);
    p.set_x(5)?;
    p.set_y(7)?;
    transcripts.push(session.settle().await?);

    let segment = segments.construct_json(&json!({
        "label": "s1",
        "from": {"x": 0, "y": 0},
        "to": {"x": 1, "y": 1},
    }))?;
    observe::attach(&segment, &[session.listener.clone()]);
    segment.set("to", json!({"x": 3, "y": 4}))?;
    segment.set("label", "s2")?;
    transcripts.push(session.settle().await?);

    observe::detach(&segment, &[session.listener.clone()])?;
    observe::detach(p.object(), &[session.listener.clone()])?;
    tracing::info!(ticks = transcripts.len(), "demo finished");
    Ok(transcripts)
}
