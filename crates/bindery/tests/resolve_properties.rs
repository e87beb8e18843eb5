//! Integration tests for command-object resolution.

use bindery::{
    BindingFilter, BindingSource, CommandObject, CommandObjectResolver, DataBinder, Dependencies,
    DependencyInjector, EntityClassifier, EntityLoader, EntityRegistry, EntityStore,
    ErrorCollection, ErrorKind, ExceptionHandlers, HttpMethod, Identifier, JsonBinder, LoadError,
    Request, RequestContext, ResolveError, TargetType,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Test fixtures
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Widget {
    id: String,
    name: String,
}

impl CommandObject for Widget {}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Signup {
    email: String,
    #[serde(skip)]
    errors: ErrorCollection,
    #[serde(skip)]
    mailer: Option<Arc<Mailer>>,
}

impl CommandObject for Signup {
    fn errors_mut(&mut self) -> Option<&mut ErrorCollection> {
        Some(&mut self.errors)
    }

    fn autowire(&mut self, dependencies: &dyn DependencyInjector) -> Result<(), ResolveError> {
        self.mailer = dependencies.get("mailer");
        Ok(())
    }
}

/// Command object without an error accessor.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Ping {
    note: String,
}

impl CommandObject for Ping {}

#[derive(Debug)]
struct Mailer;

/// Classifies `Widget` as persistent and serves it from a fixed table.
struct WidgetLoader {
    calls: AtomicUsize,
    fail_with: Option<&'static str>,
}

impl WidgetLoader {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_with: None,
        })
    }

    fn failing(message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_with: Some(message),
        })
    }
}

#[derive(Debug)]
struct StoreDown(&'static str);

impl std::fmt::Display for StoreDown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for StoreDown {}

struct Shared<T>(Arc<T>);

impl EntityClassifier for Shared<WidgetLoader> {
    fn is_persistent(&self, target: &TargetType) -> bool {
        *target == TargetType::of::<Widget>()
    }
}

impl EntityLoader for Shared<WidgetLoader> {
    fn load(&self, _target: &TargetType, id: &Identifier) -> Result<Box<dyn Any + Send>, LoadError> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.0.fail_with {
            return Err(LoadError::store(StoreDown(message)));
        }
        Ok(Box::new(Widget {
            id: id.to_string(),
            name: "stored".into(),
        }))
    }
}

/// Binder that records each call before delegating to [`JsonBinder`].
#[derive(Default)]
struct RecordingBinder {
    calls: Mutex<Vec<(Vec<String>, BindingFilter)>>,
}

impl DataBinder for Shared<RecordingBinder> {
    fn bind(
        &self,
        target: &mut Value,
        source: &BindingSource,
        filter: &BindingFilter,
    ) -> Result<(), ResolveError> {
        let names = source.iter().map(|(k, _)| k.clone()).collect();
        self.0.calls.lock().unwrap().push((names, filter.clone()));
        JsonBinder.bind(target, source, filter)
    }
}

/// Binder that always fails with the given kind.
struct FailingBinder(ErrorKind);

impl DataBinder for FailingBinder {
    fn bind(&self, _: &mut Value, _: &BindingSource, _: &BindingFilter) -> Result<(), ResolveError> {
        Err(ResolveError::new(self.0.clone(), "type mismatch on 'email'"))
    }
}

struct Harness {
    loader: Arc<WidgetLoader>,
    binder: Arc<RecordingBinder>,
}

impl Harness {
    fn new(loader: Arc<WidgetLoader>) -> Self {
        Self {
            loader,
            binder: Arc::new(RecordingBinder::default()),
        }
    }

    fn resolver(&self) -> CommandObjectResolver {
        CommandObjectResolver::builder("WidgetController")
            .classifier(Shared(self.loader.clone()))
            .loader(Shared(self.loader.clone()))
            .binder(Shared(self.binder.clone()))
            .dependencies(Dependencies::new().with("mailer", Mailer))
            .build()
    }

    fn bind_calls(&self) -> usize {
        self.binder.calls.lock().unwrap().len()
    }

    fn load_calls(&self) -> usize {
        self.loader.calls.load(Ordering::SeqCst)
    }
}

fn context(request: Request) -> RequestContext {
    let mut ctx = RequestContext::new(request);
    ctx.set_errors(ErrorCollection::new());
    ctx
}

// ============================================================================
// Persistent entities
// ============================================================================

#[test]
fn loaded_entity_binds_only_for_mutating_methods() {
    let cases = [
        (HttpMethod::Patch, true),
        (HttpMethod::Post, true),
        (HttpMethod::Put, true),
        (HttpMethod::Get, false),
        (HttpMethod::Delete, false),
        (HttpMethod::Head, false),
    ];

    for (method, binds) in cases {
        let harness = Harness::new(WidgetLoader::ok());
        let mut ctx = context(
            Request::new(method)
                .with_param("id", "42")
                .with_param("name", "bound"),
        );

        let widget: Widget = harness
            .resolver()
            .resolve(&mut ctx, "widget")
            .unwrap()
            .unwrap();

        assert_eq!(widget.id, "42", "{method}");
        assert_eq!(harness.load_calls(), 1, "{method}");
        assert_eq!(harness.bind_calls(), usize::from(binds), "{method}");
        let expected = if binds { "bound" } else { "stored" };
        assert_eq!(widget.name, expected, "{method}");
    }
}

#[test]
fn put_with_identifier_overwrites_loaded_fields() {
    let harness = Harness::new(WidgetLoader::ok());
    let mut ctx = context(
        Request::new(HttpMethod::Put)
            .with_path_param("id", "42")
            .with_param("name", "renamed"),
    );

    let widget: Widget = harness.resolver().resolve(&mut ctx, "widget").unwrap().unwrap();
    assert_eq!(
        widget,
        Widget {
            id: "42".into(),
            name: "renamed".into()
        }
    );
    assert!(!ctx.has_errors());
}

#[test]
fn load_failure_returns_none_and_records_one_error() {
    let harness = Harness::new(WidgetLoader::failing("not found"));
    let mut ctx = context(Request::new(HttpMethod::Put).with_path_param("id", "42"));

    let widget: Option<Widget> = harness.resolver().resolve(&mut ctx, "widget").unwrap();

    assert!(widget.is_none());
    assert!(ctx.has_errors());
    let errors = ctx.errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors
        .first()
        .unwrap()
        .key
        .ends_with(".commandObject.widget.error"));
    assert_eq!(errors.first().unwrap().message, "not found");
    assert_eq!(harness.bind_calls(), 0);
}

#[test]
fn entity_without_identifier_on_get_is_not_constructed() {
    let harness = Harness::new(WidgetLoader::ok());
    let mut ctx = context(Request::new(HttpMethod::Get).with_param("name", "x"));

    let widget: Option<Widget> = harness.resolver().resolve(&mut ctx, "widget").unwrap();

    assert!(widget.is_none());
    assert_eq!(harness.load_calls(), 0);
    assert_eq!(harness.bind_calls(), 0);
    assert!(!ctx.has_errors());
}

#[test]
fn entity_without_identifier_on_post_is_constructed_and_bound() {
    let harness = Harness::new(WidgetLoader::ok());
    let mut ctx = context(Request::new(HttpMethod::Post).with_param("name", "fresh"));

    let widget: Widget = harness.resolver().resolve(&mut ctx, "widget").unwrap().unwrap();

    assert_eq!(widget.name, "fresh");
    assert_eq!(widget.id, "");
    assert_eq!(harness.load_calls(), 0);
    assert_eq!(harness.bind_calls(), 1);
}

#[test]
fn blank_and_null_identifiers_count_as_absent() {
    for raw in ["", "   ", "null", " null "] {
        let harness = Harness::new(WidgetLoader::ok());
        let mut ctx = context(Request::new(HttpMethod::Get).with_param("id", raw));
        let widget: Option<Widget> = harness.resolver().resolve(&mut ctx, "widget").unwrap();
        assert!(widget.is_none(), "{raw:?}");
        assert_eq!(harness.load_calls(), 0, "{raw:?}");

        let harness = Harness::new(WidgetLoader::ok());
        let mut ctx = context(
            Request::new(HttpMethod::Post)
                .with_param("id", raw)
                .with_param("name", "created"),
        );
        let widget: Widget = harness.resolver().resolve(&mut ctx, "widget").unwrap().unwrap();
        assert_eq!(widget.name, "created", "{raw:?}");
        assert_eq!(harness.load_calls(), 0, "{raw:?}");
    }
}

#[test]
fn blank_source_identifier_does_not_consult_route() {
    let harness = Harness::new(WidgetLoader::ok());
    let mut ctx = context(
        Request::new(HttpMethod::Get)
            .with_param("id", " ")
            .with_path_param("id", "42"),
    );
    let widget: Option<Widget> = harness.resolver().resolve(&mut ctx, "widget").unwrap();
    assert!(widget.is_none());
    assert_eq!(harness.load_calls(), 0);
}

#[test]
fn trimmed_identifier_reaches_loader() {
    let harness = Harness::new(WidgetLoader::ok());
    let mut ctx = context(Request::new(HttpMethod::Get).with_param("id", "  17 "));
    let widget: Widget = harness.resolver().resolve(&mut ctx, "widget").unwrap().unwrap();
    assert_eq!(widget.id, "17");
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Account {
    id: u64,
    name: String,
    #[serde(skip)]
    password_hash: String,
    #[serde(skip)]
    errors: ErrorCollection,
}

impl CommandObject for Account {
    fn errors_mut(&mut self) -> Option<&mut ErrorCollection> {
        Some(&mut self.errors)
    }

    fn accept_bound(&mut self, bound: Self) {
        let password_hash = std::mem::take(&mut self.password_hash);
        *self = Self {
            password_hash,
            ..bound
        };
    }
}

struct AccountStore;

impl EntityStore for AccountStore {
    type Item = Account;
    type Id = u64;
    type Error = StoreDown;

    fn parse_id(&self, id: &Identifier) -> Result<u64, StoreDown> {
        id.as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or(StoreDown("not an account id"))
    }

    fn get(&self, id: &u64) -> Result<Option<Account>, StoreDown> {
        let mut errors = ErrorCollection::new();
        errors.reject("name", "previously rejected");
        Ok((*id == 1).then(|| Account {
            id: 1,
            name: "a".into(),
            password_hash: "HASH".into(),
            errors,
        }))
    }

    fn not_found_error(_id: &u64) -> StoreDown {
        StoreDown("no such account")
    }
}

#[test]
fn binding_a_loaded_entity_keeps_state_outside_bound_fields() {
    let resolver = CommandObjectResolver::builder("AccountController")
        .entities(EntityRegistry::new().with(AccountStore))
        .build();
    let mut ctx = context(
        Request::new(HttpMethod::Put)
            .with_path_param("id", "1")
            .with_param("name", "b"),
    );

    let account: Account = resolver.resolve(&mut ctx, "account").unwrap().unwrap();

    assert_eq!(account.id, 1);
    assert_eq!(account.name, "b");
    assert_eq!(account.password_hash, "HASH");
    assert_eq!(account.errors.len(), 1);
    assert!(!ctx.has_errors());
}

#[test]
fn missing_entity_from_store_is_recorded_as_load_failure() {
    let resolver = CommandObjectResolver::builder("AccountController")
        .entities(EntityRegistry::new().with(AccountStore))
        .build();
    let mut ctx = context(Request::new(HttpMethod::Get).with_path_param("id", "2"));

    let account: Option<Account> = resolver.resolve(&mut ctx, "account").unwrap();

    assert!(account.is_none());
    let error = ctx.errors().unwrap().first().unwrap();
    assert_eq!(error.key, "AccountController.commandObject.account.error");
    assert_eq!(error.message, "no such account");
}

// ============================================================================
// Plain command objects
// ============================================================================

#[test]
fn plain_type_is_always_constructed_and_bound() {
    for method in [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
    ] {
        let harness = Harness::new(WidgetLoader::ok());
        let mut ctx = context(
            Request::new(method)
                .with_param("email", "a@example.com")
                .with_param("id", "42"),
        );

        let signup: Signup = harness.resolver().resolve(&mut ctx, "signup").unwrap().unwrap();

        assert_eq!(signup.email, "a@example.com", "{method}");
        assert_eq!(harness.load_calls(), 0, "{method}");
        let calls = harness.binder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1, "{method}");
        assert_eq!(calls[0].1, BindingFilter::all(), "{method}");
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Search {
    query: String,
    page: Option<u32>,
    min_price: f64,
    in_stock: Option<bool>,
    #[serde(skip)]
    errors: ErrorCollection,
}

impl CommandObject for Search {
    fn errors_mut(&mut self) -> Option<&mut ErrorCollection> {
        Some(&mut self.errors)
    }
}

#[test]
fn default_binder_fills_optional_and_float_fields() {
    let resolver = CommandObjectResolver::builder("SearchController").build();
    let mut ctx = context(
        Request::new(HttpMethod::Get)
            .with_param("query", "x")
            .with_param("page", "2")
            .with_param("min_price", "9.5")
            .with_param("in_stock", "true"),
    );

    let search: Search = resolver.resolve(&mut ctx, "search").unwrap().unwrap();

    assert!(search.errors.is_empty(), "{:?}", search.errors);
    assert_eq!(search.query, "x");
    assert_eq!(search.page, Some(2));
    assert_eq!(search.min_price, 9.5);
    assert_eq!(search.in_stock, Some(true));
}

#[test]
fn blank_optional_field_stays_unset() {
    let resolver = CommandObjectResolver::builder("SearchController").build();
    let mut ctx = context(
        Request::new(HttpMethod::Get)
            .with_param("query", "x")
            .with_param("page", ""),
    );

    let search: Search = resolver.resolve(&mut ctx, "search").unwrap().unwrap();

    assert!(search.errors.is_empty(), "{:?}", search.errors);
    assert_eq!(search.query, "x");
    assert_eq!(search.page, None);
}

#[test]
fn resolved_instances_are_autowired() {
    let harness = Harness::new(WidgetLoader::ok());
    let mut ctx = context(Request::new(HttpMethod::Get));
    let signup: Signup = harness.resolver().resolve(&mut ctx, "signup").unwrap().unwrap();
    assert!(signup.mailer.is_some());
}

#[test]
fn multiple_prefixes_in_one_request_stay_independent() {
    let harness = Harness::new(WidgetLoader::ok());
    let resolver = harness.resolver();
    let mut ctx = context(
        Request::new(HttpMethod::Post)
            .with_param("signup.email", "b@example.com")
            .with_param("ping.note", "hello"),
    );

    let signup: Signup = resolver.resolve(&mut ctx, "signup").unwrap().unwrap();
    let ping: Ping = resolver.resolve(&mut ctx, "ping").unwrap().unwrap();

    assert_eq!(signup.email, "b@example.com");
    assert_eq!(ping.note, "hello");
    let calls = harness.binder.calls.lock().unwrap();
    assert_eq!(calls[0].0, vec!["email"]);
    assert_eq!(calls[1].0, vec!["note"]);
}

// ============================================================================
// Failure policy
// ============================================================================

#[test]
fn unhandled_binding_failure_degrades_to_annotated_default() {
    let resolver = CommandObjectResolver::builder("SignupController")
        .binder(FailingBinder(ErrorKind::custom("TypeMismatch")))
        .dependencies(Dependencies::new().with("mailer", Mailer))
        .build();
    let mut ctx = context(Request::new(HttpMethod::Post).with_param("email", "x"));

    let signup: Signup = resolver.resolve(&mut ctx, "signup").unwrap().unwrap();

    assert_eq!(signup.email, "");
    assert_eq!(signup.errors.len(), 1);
    let error = signup.errors.first().unwrap();
    assert_eq!(error.key, "signup");
    assert_eq!(
        error.message,
        "Error occurred initializing command object [signup]. type mismatch on 'email'"
    );
    assert!(signup.mailer.is_some(), "substitute instance is still autowired");
    assert!(!ctx.has_errors());
}

#[test]
fn unhandled_failure_without_error_accessor_still_returns_instance() {
    let resolver = CommandObjectResolver::builder("PingController")
        .binder(FailingBinder(ErrorKind::Binding))
        .build();
    let mut ctx = context(Request::new(HttpMethod::Get).with_param("note", "x"));

    let ping: Option<Ping> = resolver.resolve(&mut ctx, "ping").unwrap();
    assert_eq!(ping.unwrap().note, "");
}

#[test]
fn handled_failure_is_propagated_unchanged() {
    let resolver = CommandObjectResolver::builder("SignupController")
        .binder(FailingBinder(ErrorKind::custom("TypeMismatch")))
        .exception_handlers(
            ExceptionHandlers::new().handle("SignupController", ErrorKind::custom("TypeMismatch")),
        )
        .build();
    let mut ctx = context(Request::new(HttpMethod::Post));

    let err = resolver.resolve::<Signup>(&mut ctx, "signup").unwrap_err();

    assert_eq!(err.kind, ErrorKind::custom("TypeMismatch"));
    assert_eq!(err.message, "type mismatch on 'email'");
}

#[test]
fn handler_matching_is_exact() {
    let resolver = CommandObjectResolver::builder("SignupController")
        .binder(FailingBinder(ErrorKind::custom("TypeMismatch")))
        .exception_handlers(
            ExceptionHandlers::new()
                .handle("SignupController", ErrorKind::Binding)
                .handle("OtherController", ErrorKind::custom("TypeMismatch")),
        )
        .build();
    let mut ctx = context(Request::new(HttpMethod::Post));

    let signup: Signup = resolver.resolve(&mut ctx, "signup").unwrap().unwrap();
    assert_eq!(signup.errors.len(), 1);
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NeedsClock {
    #[serde(skip)]
    errors: ErrorCollection,
}

impl CommandObject for NeedsClock {
    fn errors_mut(&mut self) -> Option<&mut ErrorCollection> {
        Some(&mut self.errors)
    }

    fn autowire(&mut self, dependencies: &dyn DependencyInjector) -> Result<(), ResolveError> {
        dependencies
            .dependency("clock")
            .map(|_| ())
            .ok_or_else(|| ResolveError::injection("clock unavailable"))
    }
}

#[test]
fn injection_failure_follows_the_same_policy() {
    let resolver = CommandObjectResolver::builder("ClockController").build();
    let mut ctx = context(Request::new(HttpMethod::Get));

    let form: NeedsClock = resolver.resolve(&mut ctx, "form").unwrap().unwrap();
    // first failure from the resolved instance, second from autowiring the substitute
    assert_eq!(form.errors.len(), 2);
    assert!(form
        .errors
        .iter()
        .all(|e| e.message.ends_with("clock unavailable")));

    let resolver = CommandObjectResolver::builder("ClockController")
        .exception_handlers(ExceptionHandlers::new().handle("ClockController", ErrorKind::Injection))
        .build();
    let err = resolver.resolve::<NeedsClock>(&mut ctx, "form").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Injection);
}

#[test]
fn malformed_body_goes_through_failure_policy() {
    let resolver = CommandObjectResolver::builder("SignupController").build();
    let mut ctx = context(Request::new(HttpMethod::Post).with_body(json!("not an object")));

    let signup: Signup = resolver.resolve(&mut ctx, "signup").unwrap().unwrap();
    assert_eq!(signup.errors.len(), 1);
    assert!(signup.errors.first().unwrap().message.contains("must be an object"));
}
