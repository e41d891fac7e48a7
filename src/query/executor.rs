//! Entity provider: owns the connection, runs compiled queries, and
//! materializes rows through bound projectors.

use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};
use xxhash_rust::xxh64::Xxh64;

use crate::connection::{Connection, RowReader};
use crate::query::ast::{Aggregator, NamedValue, ProjectionNode, ProjectorKind};
use crate::query::builder::QueryBuilder;
use crate::query::errors::TranslationError;
use crate::query::formatter::{check_table_name, QueryCommand};
use crate::query::mapping::{EntityMapping, StaticMapping};
use crate::query::ops::QueryOp;
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::record::{Entity, FromRecord, Record};
use crate::query::translator::{Translation, Translator};
use crate::query::value::{Value, WireType};
use crate::types::{HiveError, Result};

/// Default number of bound projectors kept per provider.
pub const DEFAULT_PROJECTOR_CACHE: usize = 64;

/// Shared flag that aborts a [`ResultStream`].
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Member slot of a bound projector.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Slot {
    member: String,
    position: usize,
    wire: WireType,
}

/// Projector resolved against the output columns of one query shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundProjector {
    kind: ProjectorKind,
    slots: Vec<Slot>,
    width: usize,
}

impl BoundProjector {
    /// Resolves every projector member to its output column position.
    pub fn bind(projection: &ProjectionNode) -> Result<Self> {
        let select = &projection.select;
        let slots = projection
            .projector
            .fields
            .iter()
            .map(|field| {
                let position = select
                    .columns
                    .iter()
                    .position(|decl| decl.name == field.column)
                    .ok_or_else(|| TranslationError::DanglingColumn {
                        alias: select.alias.to_string(),
                        name: field.column.clone(),
                    })?;
                Ok(Slot {
                    member: field.member.clone(),
                    position,
                    wire: select.columns[position].wire,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            kind: projection.projector.kind.clone(),
            slots,
            width: select.columns.len().max(1),
        })
    }

    /// Number of fields a row must carry.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Result shape.
    pub fn kind(&self) -> &ProjectorKind {
        &self.kind
    }

    /// Converts one positional field vector into a record.
    pub fn project(&self, row: Vec<Value>) -> Result<Record> {
        if row.len() != self.width {
            return Err(HiveError::execution(
                -1,
                format!("row has {} fields, expected {}", row.len(), self.width),
            ));
        }
        let fields = self
            .slots
            .iter()
            .map(|slot| {
                let value = row[slot.position].clone().coerce(slot.wire).map_err(|err| {
                    HiveError::execution(-1, format!("member '{}': {err}", slot.member))
                })?;
                Ok((slot.member.clone(), value))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Record::new(fields))
    }
}

fn projector_key(command: &QueryCommand, projection: &ProjectionNode) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.write(command.text().as_bytes());
    projection.projector.hash(&mut hasher);
    for decl in &projection.select.columns {
        decl.name.hash(&mut hasher);
        decl.wire.hash(&mut hasher);
    }
    hasher.finish()
}

struct Link {
    connection: Box<dyn Connection>,
    users: usize,
}

struct Shared {
    link: Mutex<Link>,
    mapping: RwLock<Arc<StaticMapping>>,
    translator: Translator,
    projectors: Mutex<LruCache<u64, Arc<BoundProjector>>>,
}

impl Shared {
    fn acquire(self: &Arc<Self>) -> Result<ConnectionLease> {
        let mut link = self.link.lock();
        if !link.connection.is_open() {
            link.connection.open()?;
            debug!(endpoint = %link.connection.endpoint(), "provider.connection.opened");
        }
        link.users += 1;
        trace!(users = link.users, "provider.connection.acquire");
        Ok(ConnectionLease {
            shared: Arc::clone(self),
        })
    }

    fn release(&self) {
        let mut link = self.link.lock();
        link.users = link.users.saturating_sub(1);
        trace!(users = link.users, "provider.connection.release");
        if link.users == 0 && link.connection.is_open() {
            if let Err(err) = link.connection.close() {
                warn!(error = %err, "provider.connection.close_failed");
            }
        }
    }
}

/// Scoped use of the provider's connection. The connection opens with the
/// first lease and closes when the last lease is dropped.
pub struct ConnectionLease {
    shared: Arc<Shared>,
}

impl ConnectionLease {
    /// Submits a command on the leased connection.
    pub fn execute(&self, command: &QueryCommand, values: &[NamedValue]) -> Result<Box<dyn RowReader>> {
        let timer = profile_timer();
        let mut link = self.shared.link.lock();
        if !link.connection.is_open() {
            link.connection.open()?;
        }
        let reader = link.connection.execute(command, values);
        record_profile_timer(QueryProfileKind::Execute, timer);
        reader
    }

    /// Submits a command and reads its output to completion.
    pub fn run(&self, command: &QueryCommand, values: &[NamedValue]) -> Result<()> {
        let mut reader = self.execute(command, values)?;
        while reader.next_row()?.is_some() {}
        Ok(())
    }

    fn abort(&self) {
        let mut link = self.shared.link.lock();
        if let Err(err) = link.connection.close() {
            warn!(error = %err, "provider.connection.close_failed");
        }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.shared.release();
    }
}

enum StreamState {
    Pending,
    Reading {
        reader: Box<dyn RowReader>,
        lease: ConnectionLease,
    },
    Done,
}

/// Lazily executed query results.
///
/// The connection is not touched until the first call to `next`. The lease
/// is released once the stream is drained or dropped.
pub struct ResultStream<T = Record> {
    shared: Arc<Shared>,
    command: QueryCommand,
    values: Vec<NamedValue>,
    projector: Arc<BoundProjector>,
    cancel: Option<CancelToken>,
    state: StreamState,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResultStream<T> {
    /// Attaches a cancel token.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Command the stream executes.
    pub fn command(&self) -> &QueryCommand {
        &self.command
    }

    /// True once the stream has been drained or failed.
    pub fn is_done(&self) -> bool {
        matches!(self.state, StreamState::Done)
    }

    fn start(&mut self) -> Result<()> {
        let lease = self.shared.acquire()?;
        let reader = lease.execute(&self.command, &self.values)?;
        let reported = reader.columns().len();
        if reported != 0 && reported != self.projector.width() {
            return Err(HiveError::execution(
                -1,
                format!(
                    "result has {reported} columns, expected {}",
                    self.projector.width()
                ),
            ));
        }
        self.state = StreamState::Reading { reader, lease };
        Ok(())
    }

    fn cancelled(&mut self) -> HiveError {
        if let StreamState::Reading { reader, lease } =
            std::mem::replace(&mut self.state, StreamState::Done)
        {
            drop(reader);
            lease.abort();
        }
        info!("provider.stream.cancelled");
        HiveError::Cancelled
    }
}

impl<T: FromRecord> Iterator for ResultStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.state, StreamState::Done) {
            return None;
        }
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Some(Err(self.cancelled()));
        }
        if matches!(self.state, StreamState::Pending) {
            if let Err(err) = self.start() {
                self.state = StreamState::Done;
                return Some(Err(err));
            }
        }
        let StreamState::Reading { reader, .. } = &mut self.state else {
            return None;
        };
        match reader.next_row() {
            Ok(Some(row)) => {
                let timer = profile_timer();
                let item = self.projector.project(row).and_then(T::from_record);
                record_profile_timer(QueryProfileKind::Materialize, timer);
                if item.is_err() {
                    self.state = StreamState::Done;
                }
                Some(item)
            }
            Ok(None) => {
                self.state = StreamState::Done;
                None
            }
            Err(err) => {
                self.state = StreamState::Done;
                Some(Err(err))
            }
        }
    }
}

/// Table created from a query result; it can be queried like any entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HiveTable {
    name: String,
    entity: Arc<EntityMapping>,
}

impl HiveTable {
    /// Table name, which is also its entity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapping registered for the table.
    pub fn entity(&self) -> &EntityMapping {
        &self.entity
    }

    /// Starts a query over the table's rows bound to `var`.
    pub fn query(&self, var: impl Into<String>) -> QueryBuilder {
        QueryBuilder::table(self.name.clone(), var)
    }
}

/// Compiles and runs queries over one physical connection.
///
/// Clones share the connection, the mapping, and the projector cache.
#[derive(Clone)]
pub struct EntityProvider {
    shared: Arc<Shared>,
}

impl EntityProvider {
    /// Creates a provider with the default projector cache size.
    pub fn new(connection: Box<dyn Connection>, mapping: StaticMapping) -> Self {
        Self::with_cache_size(connection, mapping, DEFAULT_PROJECTOR_CACHE)
    }

    /// Creates a provider caching up to `capacity` bound projectors.
    pub fn with_cache_size(
        connection: Box<dyn Connection>,
        mapping: StaticMapping,
        capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            shared: Arc::new(Shared {
                link: Mutex::new(Link {
                    connection,
                    users: 0,
                }),
                mapping: RwLock::new(Arc::new(mapping)),
                translator: Translator::new(),
                projectors: Mutex::new(LruCache::new(capacity)),
            }),
        }
    }

    /// Current mapping snapshot.
    pub fn mapping(&self) -> Arc<StaticMapping> {
        self.shared.mapping.read().clone()
    }

    /// Starts a query over the rows of `E`.
    pub fn entities<E: Entity>(&self, var: impl Into<String>) -> QueryBuilder {
        QueryBuilder::table(E::ENTITY, var)
    }

    /// Marks the connection in use, opening it if needed.
    pub fn lease(&self) -> Result<ConnectionLease> {
        self.shared.acquire()
    }

    /// Number of outstanding leases.
    pub fn active_leases(&self) -> usize {
        self.shared.link.lock().users
    }

    /// Compiles `op` against the current mapping.
    pub fn translate(&self, op: &QueryOp) -> Result<Translation> {
        let mapping = self.mapping();
        self.shared.translator.translate(op, mapping.as_ref())
    }

    /// Compiles `op` and returns a lazy stream over its results.
    pub fn query<T: FromRecord>(&self, op: &QueryOp) -> Result<ResultStream<T>> {
        let translation = self.translate(op)?;
        self.stream(&translation)
    }

    /// Returns a lazy stream over the results of a compiled query.
    pub fn stream<T: FromRecord>(&self, translation: &Translation) -> Result<ResultStream<T>> {
        let projection = translation.projection()?;
        let projector = self.projector(&translation.command, projection)?;
        Ok(ResultStream {
            shared: Arc::clone(&self.shared),
            command: translation.command.clone(),
            values: translation.values.clone(),
            projector,
            cancel: None,
            state: StreamState::Pending,
            _marker: PhantomData,
        })
    }

    /// Runs `op` and collects every result.
    pub fn fetch<T: FromRecord>(&self, op: &QueryOp) -> Result<Vec<T>> {
        self.query(op)?.collect()
    }

    /// Runs a query ending in an aggregate or element operator and applies
    /// its reduction.
    pub fn scalar<T: FromRecord>(&self, op: &QueryOp) -> Result<Option<T>> {
        let translation = self.translate(op)?;
        let aggregator = translation
            .projection()?
            .aggregator
            .ok_or(HiveError::Invalid("query has no aggregate or element operator"))?;
        let rows = self.stream::<T>(&translation)?.collect::<Result<Vec<_>>>()?;
        apply_aggregator(aggregator, rows)
    }

    fn projector(
        &self,
        command: &QueryCommand,
        projection: &ProjectionNode,
    ) -> Result<Arc<BoundProjector>> {
        let key = projector_key(command, projection);
        if let Some(bound) = self.shared.projectors.lock().get(&key) {
            trace!(key, "provider.projector.hit");
            return Ok(Arc::clone(bound));
        }
        let bound = Arc::new(BoundProjector::bind(projection)?);
        self.shared.projectors.lock().put(key, Arc::clone(&bound));
        trace!(key, "provider.projector.bound");
        Ok(bound)
    }

    /// Number of cached projectors.
    pub fn cached_projectors(&self) -> usize {
        self.shared.projectors.lock().len()
    }

    /// Materializes the result of `op` as table `name` and registers it as
    /// an entity.
    pub fn create_table(&self, op: &QueryOp, name: &str) -> Result<HiveTable> {
        check_table_name(name)?;
        if name.contains('.') {
            return Err(TranslationError::unsupported(
                "table name",
                format!("'{name}' must not be database-qualified"),
            )
            .into());
        }
        let translation = self.translate(op)?;
        let projection = translation.projection()?;
        if projection.aggregator.is_some() {
            return Err(TranslationError::UnsupportedOperator {
                op: "create_table",
                reason: "scalar and element queries cannot be stored as tables".to_owned(),
            }
            .into());
        }
        let entity = derived_entity(name, projection)?;
        let command = QueryCommand::new(
            format!(
                "CREATE TABLE IF NOT EXISTS {name} AS {}",
                translation.command.text()
            ),
            translation.command.parameters().to_vec(),
        );
        self.lease()?.run(&command, &translation.values)?;

        let entity = Arc::new(entity);
        let mut mapping = self.shared.mapping.write();
        *mapping = Arc::new(mapping.with_replaced(entity.as_ref().clone())?);
        info!(table = %name, columns = entity.columns.len(), "provider.table.created");
        Ok(HiveTable {
            name: name.to_owned(),
            entity,
        })
    }

    /// Drops a table created by [`EntityProvider::create_table`] and removes
    /// its entity.
    pub fn drop_table(&self, table: &HiveTable) -> Result<()> {
        self.drop_table_named(&table.name)
    }

    /// Drops table `name` and removes any entity registered under it.
    pub fn drop_table_named(&self, name: &str) -> Result<()> {
        check_table_name(name)?;
        let command = QueryCommand::statement(format!("DROP TABLE IF EXISTS {name}"));
        self.lease()?.run(&command, &[])?;
        let mut mapping = self.shared.mapping.write();
        *mapping = Arc::new(mapping.without(name));
        info!(table = %name, "provider.table.dropped");
        Ok(())
    }
}

fn derived_entity(name: &str, projection: &ProjectionNode) -> Result<EntityMapping> {
    let bound = BoundProjector::bind(projection)?;
    let select = &projection.select;
    let mut entity = EntityMapping::new(name, name);
    for slot in &bound.slots {
        let column = &select.columns[slot.position];
        entity = entity.member(slot.member.replace('.', "_"), column.name.clone(), slot.wire);
    }
    Ok(entity)
}

/// Reduces materialized rows according to an element or scalar operator.
pub fn apply_aggregator<T>(aggregator: Aggregator, rows: Vec<T>) -> Result<Option<T>> {
    let count = rows.len();
    let first = rows.into_iter().next();
    match aggregator {
        Aggregator::First => first
            .map(Some)
            .ok_or(HiveError::Invalid("sequence contains no elements")),
        Aggregator::FirstOrDefault => Ok(first),
        Aggregator::Single | Aggregator::SingleOrDefault if count > 1 => {
            Err(HiveError::Invalid("sequence contains more than one element"))
        }
        Aggregator::Single => first
            .map(Some)
            .ok_or(HiveError::Invalid("sequence contains no elements")),
        Aggregator::SingleOrDefault => Ok(first),
    }
}
