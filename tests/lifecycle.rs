//! Context lifecycle scenarios

use bean_context::proxy::{Arguments, FnHandler, HandlerScope, MethodHandler, Proxy};
use bean_context::{
    BeanDefinition, ComponentRegistration, Context, DiError, Inject, Introspect, Module, Phase, Result,
    TypeDescriptor, component, marker,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// =============================================================================
// End-to-end
// =============================================================================

struct Logger;

struct Repository {
    logger: Arc<Logger>,
}

impl Introspect for Repository {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<Repository>()
            .marker(marker::COMPONENT)
            .constructor(|logger: Arc<Logger>| Repository { logger })
            .build()
    }
}

struct Service {
    repository: Arc<Repository>,
}

impl Introspect for Service {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<Service>()
            .marker(marker::SERVICE)
            .qualifier("main")
            .primary()
            .constructor(|repository: Arc<Repository>| Service { repository })
            .build()
    }
}

#[test]
fn test_end_to_end() {
    let ctx = Context::builder()
        .name("e2e")
        .core_singleton(Arc::new(Logger))
        .use_inventory(false)
        .build();
    ctx.register_component::<Repository>().unwrap();
    ctx.register_component::<Service>().unwrap();
    ctx.init().unwrap();

    let service = ctx.get_bean::<Service>().unwrap().expect("service bean");
    let repository = ctx.get_bean::<Repository>().unwrap().expect("repository bean");
    assert!(Arc::ptr_eq(&service.repository, &repository));
    assert!(Arc::ptr_eq(&repository.logger, &ctx.require_bean::<Logger>().unwrap()));

    let named = ctx.require_bean_named::<Service>("main").unwrap();
    assert!(Arc::ptr_eq(&service, &named));
}

#[test]
fn test_singleton_property() {
    let ctx = Context::builder()
        .core_singleton(Arc::new(Logger))
        .use_inventory(false)
        .build();
    ctx.register_component::<Repository>().unwrap();
    ctx.init().unwrap();

    let first = ctx.require_bean::<Repository>().unwrap();
    let second = ctx.require_bean::<Repository>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

// =============================================================================
// Cycles
// =============================================================================

struct CycleA {
    _b: Arc<CycleB>,
}

struct CycleB {
    _a: Arc<CycleA>,
}

impl Introspect for CycleA {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<CycleA>()
            .constructor(|b: Arc<CycleB>| CycleA { _b: b })
            .build()
    }
}

impl Introspect for CycleB {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<CycleB>()
            .constructor(|a: Arc<CycleA>| CycleB { _a: a })
            .build()
    }
}

#[test]
fn test_constructor_cycle_is_reported() {
    let ctx = Context::builder().use_inventory(false).build();
    ctx.register_component::<CycleA>().unwrap();
    ctx.register_component::<CycleB>().unwrap();

    match ctx.init() {
        Err(DiError::CircularDependency { cycle, .. }) => {
            assert!(cycle.iter().any(|name| name.ends_with("CycleA")));
            assert!(cycle.iter().any(|name| name.ends_with("CycleB")));
            assert_eq!(cycle.first(), cycle.last());
        }
        other => panic!("expected a circular dependency, got {other:?}"),
    }
}

struct Left {
    right: Inject<Right>,
}

struct Right {
    left: Inject<Left>,
}

impl Introspect for Left {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<Left>()
            .constructor(|()| Left { right: Inject::new() })
            .field("right", |l: &Left| &l.right)
            .build()
    }
}

impl Introspect for Right {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<Right>()
            .constructor(|()| Right { left: Inject::new() })
            .field("left", |r: &Right| &r.left)
            .build()
    }
}

#[test]
fn test_field_cycle_resolves() {
    let ctx = Context::builder().use_inventory(false).build();
    ctx.register_component::<Left>().unwrap();
    ctx.register_component::<Right>().unwrap();
    ctx.init().unwrap();

    let left = ctx.require_bean::<Left>().unwrap();
    let right = ctx.require_bean::<Right>().unwrap();
    assert!(Arc::ptr_eq(&left.right.require().unwrap(), &right));
    assert!(Arc::ptr_eq(&right.left.require().unwrap(), &left));
}

// =============================================================================
// Qualifiers, duplicates, phases
// =============================================================================

struct Endpoint(&'static str);

#[test]
fn test_qualifier_disambiguation() {
    let ambiguous = Context::builder().use_inventory(false).build();
    ambiguous
        .register_bean(BeanDefinition::instance(Arc::new(Endpoint("x"))).named("x"))
        .unwrap();
    ambiguous
        .register_bean(BeanDefinition::instance(Arc::new(Endpoint("y"))).named("y"))
        .unwrap();
    ambiguous.init().unwrap();
    assert!(matches!(ambiguous.get_bean::<Endpoint>(), Err(DiError::Ambiguous { .. })));
    assert_eq!(ambiguous.require_bean_named::<Endpoint>("y").unwrap().0, "y");

    let preferred = Context::builder().use_inventory(false).build();
    preferred
        .register_bean(BeanDefinition::instance(Arc::new(Endpoint("x"))).named("x").primary())
        .unwrap();
    preferred
        .register_bean(BeanDefinition::instance(Arc::new(Endpoint("y"))).named("y"))
        .unwrap();
    preferred.init().unwrap();
    assert_eq!(preferred.require_bean::<Endpoint>().unwrap().0, "x");
}

trait Named: Send + Sync {
    fn name(&self) -> &'static str;
}

impl Named for Endpoint {
    fn name(&self) -> &'static str {
        self.0
    }
}

#[test]
fn test_duplicate_rejection() {
    let ctx = Context::builder().use_inventory(false).build();
    ctx.register_instance(Arc::new(Logger)).unwrap();
    let err = ctx.register_instance(Arc::new(Logger)).unwrap_err();
    assert!(matches!(err, DiError::DuplicateDefinition { .. }));
    assert!(err.is_configuration_error());

    // One definition under two requested types
    let definition = ctx
        .register_bean(BeanDefinition::instance(Arc::new(Endpoint("api"))).implements(|e: Arc<Endpoint>| e as Arc<dyn Named>))
        .unwrap();
    assert!(matches!(
        ctx.register_bean_as::<dyn Named>(&definition),
        Err(DiError::DuplicateDefinition { .. })
    ));

    ctx.init().unwrap();
    assert_eq!(ctx.require_bean::<dyn Named>().unwrap().name(), "api");
    assert_eq!(ctx.require_bean::<Endpoint>().unwrap().0, "api");
}

#[test]
fn test_phase_guard() {
    let ctx = Context::builder().use_inventory(false).build();
    ctx.init().unwrap();

    let err = ctx.register_instance(Arc::new(Logger)).unwrap_err();
    assert!(matches!(err, DiError::PhaseViolation { .. }));
    assert!(ctx.phase() > Phase::Instantiate);
}

#[test]
fn test_modules_register_before_instantiation() {
    let ctx = Context::builder()
        .core_singleton(Arc::new(Logger))
        .use_inventory(false)
        .module(
            Module::new("persistence")
                .requires::<Logger>()
                .on_init(|ctx| ctx.register_component::<Repository>().map(|_| ())),
        )
        .build();
    ctx.init().unwrap();
    assert!(ctx.contains_bean::<Repository>());
}

struct LateRegistrar {
    attempt: Option<DiError>,
}

#[test]
fn test_registration_during_instantiation_is_rejected() {
    let ctx = Context::builder().use_inventory(false).build();
    let handle = ctx.clone();
    ctx.register_bean(BeanDefinition::factory::<LateRegistrar, _>(move |_resolver| {
        let attempt = handle.register_instance(Arc::new(Endpoint("late"))).err();
        Ok(Arc::new(LateRegistrar { attempt }))
    }))
    .unwrap();
    ctx.init().unwrap();

    let registrar = ctx.require_bean::<LateRegistrar>().unwrap();
    assert!(matches!(
        registrar.attempt,
        Some(DiError::PhaseViolation {
            phase: Phase::Instantiate,
            ..
        })
    ));
    assert!(!ctx.contains_bean::<Endpoint>());
}

struct Misdeclared;

impl Introspect for Misdeclared {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<Misdeclared>()
            .marker(marker::COMPONENT)
            .constructor(|()| Misdeclared)
            .method("intercept", &[marker::METHOD_HANDLER])
            .build()
    }
}

struct Gauge;

impl Introspect for Gauge {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<Gauge>()
            .marker(marker::COMPONENT)
            .constructor(|()| Gauge)
            .build()
    }
}

#[test]
fn test_malformed_core_namespace_fails_init() {
    let ctx = Context::builder()
        .namespace("core")
        .component(ComponentRegistration::of::<Gauge>("core::metrics"))
        .component(ComponentRegistration::of::<Misdeclared>("core::web"))
        .use_inventory(false)
        .build();

    assert!(matches!(ctx.init(), Err(DiError::MalformedMetadata { .. })));
    assert!(ctx.phase() < Phase::Running);
}

#[test]
fn test_failed_module_scan_does_not_hide_types_from_later_modules() {
    let ctx = Context::builder()
        .component(ComponentRegistration::of::<Gauge>("plugins::metrics"))
        .component(ComponentRegistration::of::<Misdeclared>("plugins::web"))
        .module(Module::new("wide").namespace("plugins"))
        .module(Module::new("narrow").namespace("plugins::metrics"))
        .use_inventory(false)
        .build();
    ctx.init().unwrap();

    assert!(ctx.contains_bean::<Gauge>());
    assert!(!ctx.contains_bean::<Misdeclared>());
    assert!(ctx.require_bean::<Gauge>().is_ok());
}

// =============================================================================
// Configuration classes
// =============================================================================

static POOLS_CREATED: AtomicUsize = AtomicUsize::new(0);

struct Pool {
    size: usize,
}

struct DataConfig;

impl Introspect for DataConfig {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<DataConfig>()
            .marker(marker::CONFIGURATION)
            .constructor(|()| DataConfig)
            .bean_method("pool", |_c: &DataConfig, _logger: Arc<Logger>| {
                POOLS_CREATED.fetch_add(1, Ordering::SeqCst);
                Arc::new(Pool { size: 8 })
            })
            .build()
    }
}

#[test]
fn test_configuration_beans_are_lazy_and_created_once() {
    let ctx = Context::builder()
        .core_singleton(Arc::new(Logger))
        .component(ComponentRegistration::of::<DataConfig>("app::config"))
        .use_inventory(false)
        .build();

    assert_eq!(ctx.scan("app::config").unwrap(), 2);
    assert_eq!(POOLS_CREATED.load(Ordering::SeqCst), 0);

    ctx.init().unwrap();
    let config = ctx.configuration::<DataConfig>().unwrap();
    let first = config.bean::<Pool>("pool").unwrap();
    let second = config.bean::<Pool>("pool").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &ctx.require_bean::<Pool>().unwrap()));
    assert_eq!(first.size, 8);
    assert_eq!(POOLS_CREATED.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Method handlers
// =============================================================================

const AUDITED: marker::Marker = marker::Marker::new("Audited");

static AUDITS: AtomicUsize = AtomicUsize::new(0);

trait Store: Send + Sync {
    fn save(&self, key: &str) -> Result<usize>;
    fn count(&self) -> Result<usize>;
}

impl Store for Proxy<dyn Store> {
    fn save(&self, key: &str) -> Result<usize> {
        self.invoke("save", Arguments::new().with(key.to_owned()), |real, _| real.save(key))
    }

    fn count(&self) -> Result<usize> {
        self.invoke("count", Arguments::new(), |real, _| real.count())
    }
}

impl Introspect for dyn Store {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::interface::<dyn Store>()
            .method("save", &[AUDITED])
            .proxy(|p| Arc::new(p) as Arc<dyn Store>)
            .build()
    }
}

#[derive(Default)]
struct MemoryStore {
    keys: Mutex<Vec<String>>,
}

impl Store for MemoryStore {
    fn save(&self, key: &str) -> Result<usize> {
        let mut keys = self.keys.lock().unwrap();
        keys.push(key.to_owned());
        Ok(keys.len())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.keys.lock().unwrap().len())
    }
}

impl Introspect for MemoryStore {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<MemoryStore>()
            .marker(marker::COMPONENT)
            .constructor(|()| MemoryStore::default())
            .implements(|s: Arc<MemoryStore>| s as Arc<dyn Store>)
            .build()
    }
}

struct Auditing;

impl Introspect for Auditing {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<Auditing>()
            .marker(marker::COMPONENT)
            .constructor(|()| Auditing)
            .handler_method(
                "audit",
                HandlerScope::target::<dyn Store>().with_method_marker(AUDITED),
                || {
                    Arc::new(FnHandler::new(|inv| {
                        AUDITS.fetch_add(1, Ordering::SeqCst);
                        inv.proceed()
                    })) as Arc<dyn MethodHandler>
                },
            )
            .build()
    }
}

#[test]
fn test_handler_routing_by_method_marker() {
    let ctx = Context::builder()
        .namespace("app")
        .component(ComponentRegistration::of::<dyn Store>("app::store"))
        .component(ComponentRegistration::of::<MemoryStore>("app::store"))
        .component(ComponentRegistration::of::<Auditing>("app::audit"))
        .use_inventory(false)
        .build();
    ctx.init().unwrap();
    assert_eq!(ctx.handlers().names(), vec!["Auditing::audit".to_owned()]);

    let store = ctx.require_bean::<dyn Store>().unwrap();
    assert_eq!(store.save("a").unwrap(), 1);
    assert_eq!(store.save("b").unwrap(), 2);
    assert_eq!(store.count().unwrap(), 2);
    assert_eq!(AUDITS.load(Ordering::SeqCst), 2);

    // The concrete type, requested directly, is the real instance
    assert_eq!(ctx.require_bean::<MemoryStore>().unwrap().count().unwrap(), 2);
    assert_eq!(AUDITS.load(Ordering::SeqCst), 2);
}

const TRACKED: marker::Marker = marker::Marker::new("Tracked");

static TRACKED_CALLS: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct JournalStore {
    inner: MemoryStore,
}

impl Store for JournalStore {
    fn save(&self, key: &str) -> Result<usize> {
        self.inner.save(key)
    }

    fn count(&self) -> Result<usize> {
        self.inner.count()
    }
}

impl Introspect for JournalStore {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<JournalStore>()
            .marker(marker::COMPONENT)
            .marker(TRACKED)
            .qualifier("journal")
            .constructor(|()| JournalStore::default())
            .implements(|s: Arc<JournalStore>| s as Arc<dyn Store>)
            .build()
    }
}

#[derive(Default)]
struct ScratchStore {
    inner: MemoryStore,
}

impl Store for ScratchStore {
    fn save(&self, key: &str) -> Result<usize> {
        self.inner.save(key)
    }

    fn count(&self) -> Result<usize> {
        self.inner.count()
    }
}

impl Introspect for ScratchStore {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<ScratchStore>()
            .marker(marker::COMPONENT)
            .qualifier("scratch")
            .constructor(|()| ScratchStore::default())
            .implements(|s: Arc<ScratchStore>| s as Arc<dyn Store>)
            .build()
    }
}

struct Tracker;

impl Introspect for Tracker {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<Tracker>()
            .marker(marker::COMPONENT)
            .constructor(|()| Tracker)
            .handler_method("track", HandlerScope::any().with_class_marker(TRACKED), || {
                Arc::new(FnHandler::new(|inv| {
                    TRACKED_CALLS.fetch_add(1, Ordering::SeqCst);
                    inv.proceed()
                })) as Arc<dyn MethodHandler>
            })
            .build()
    }
}

#[test]
fn test_handler_routing_by_class_marker() {
    let ctx = Context::builder()
        .namespace("tracked")
        .component(ComponentRegistration::of::<dyn Store>("tracked::store"))
        .component(ComponentRegistration::of::<JournalStore>("tracked::store"))
        .component(ComponentRegistration::of::<ScratchStore>("tracked::store"))
        .component(ComponentRegistration::of::<Tracker>("tracked::handlers"))
        .use_inventory(false)
        .build();
    ctx.init().unwrap();

    let journal = ctx.require_bean_named::<dyn Store>("journal").unwrap();
    let scratch = ctx.require_bean_named::<dyn Store>("scratch").unwrap();

    journal.save("a").unwrap();
    journal.count().unwrap();
    scratch.save("b").unwrap();
    assert_eq!(TRACKED_CALLS.load(Ordering::SeqCst), 2);
    assert_eq!(scratch.count().unwrap(), 1);
    assert_eq!(TRACKED_CALLS.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Link-time discovery
// =============================================================================

struct Clock;

impl Introspect for Clock {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::builder::<Clock>()
            .marker(marker::SERVICE)
            .constructor(|()| Clock)
            .build()
    }
}

component!(Clock, namespace = "lifecycle::linked");

#[test]
fn test_component_macro_registrations_are_scanned() {
    let ctx = Context::builder().namespace("lifecycle::linked").build();
    ctx.init().unwrap();
    assert!(ctx.require_bean::<Clock>().is_ok());

    let isolated = Context::builder()
        .namespace("lifecycle::linked")
        .use_inventory(false)
        .build();
    isolated.init().unwrap();
    assert!(isolated.get_bean::<Clock>().unwrap().is_none());
}
