//! Command-object resolution.
//!
//! [`CommandObjectResolver::resolve`] turns the current request into a
//! populated, dependency-injected instance of a command-object type.
//!
//! # Pipeline
//!
//! ```text
//! request
//!   → binding source (factory, then scoped by parameter name)
//!   → classify type: persistent entity or plain
//!   → identifier (entities only: source id, else route/param id; trimmed,
//!                 "" and "null" mean absent)
//!   → identifier present: load by id          (failure → request error, no instance)
//!     identifier absent:  T::default()        (entities only on POST)
//!   → bind request data                       (loaded: PATCH/POST/PUT only; new: always)
//!   → autowire dependencies
//! ```
//!
//! # Failure Policy
//!
//! Load failures are recorded in the request's
//! [`ErrorCollection`](crate::ErrorCollection) under
//! `<owner>.commandObject.<prefix>.error` and resolution continues with no
//! instance.
//!
//! Any other failure is checked against the owner's
//! [`ExceptionHandlerLookup`] first. If the owner handles that
//! [`ErrorKind`](crate::ErrorKind) the error is returned untouched.
//! Otherwise the resolver hands back a fresh default instance carrying the
//! error in its own collection (when it exposes one).

use crate::binder::{BindingFilter, DataBinder, JsonBinder};
use crate::config::ResolverConfig;
use crate::context::{HttpMethod, RequestContext};
use crate::entity::{EntityClassifier, EntityLoader, EntityRegistry, TargetType};
use crate::error::{LoadError, ResolveError};
use crate::errors::{ErrorCollection, FieldError};
use crate::exception::{ExceptionHandlerLookup, ExceptionHandlers};
use crate::inject::{Dependencies, DependencyInjector};
use crate::source::{
    normalize_identifier, BindingSource, BindingSourceFactory, FallbackIdentifierExtractor,
    Identifier, NestedPrefixScoper, PrefixScoper, RequestBindingSourceFactory,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

const RESOLVE_TARGET: &str = "bindery::resolve";

/// A type that can be materialized from a request.
///
/// `Default` is the no-argument constructor. Binding goes through the
/// type's serde representation, which must round-trip: a field that is
/// serialized but not deserialized needs `#[serde(default)]`.
pub trait CommandObject: Default + Serialize + DeserializeOwned + Send + 'static {
    /// The instance's own error collection, if it keeps one.
    fn errors_mut(&mut self) -> Option<&mut ErrorCollection> {
        None
    }

    /// Pulls dependencies by property name. Names with no registered
    /// dependency should be skipped, not reported.
    fn autowire(&mut self, _dependencies: &dyn DependencyInjector) -> Result<(), ResolveError> {
        Ok(())
    }

    /// Takes over the result of binding request data.
    ///
    /// `bound` is this instance rebuilt from its serde form with the request
    /// fields applied, so anything outside that form (`#[serde(skip)]`
    /// fields) holds its default there. The default replaces `self`
    /// outright. Types carrying such state override this to keep it. The
    /// error collection from [`errors_mut`](Self::errors_mut) is carried
    /// over either way.
    ///
    /// ```rust
    /// use bindery::CommandObject;
    /// use serde::{Deserialize, Serialize};
    ///
    /// #[derive(Default, Serialize, Deserialize)]
    /// struct Account {
    ///     name: String,
    ///     #[serde(skip)]
    ///     password_hash: String,
    /// }
    ///
    /// impl CommandObject for Account {
    ///     fn accept_bound(&mut self, bound: Self) {
    ///         let password_hash = std::mem::take(&mut self.password_hash);
    ///         *self = Self { password_hash, ..bound };
    ///     }
    /// }
    /// ```
    fn accept_bound(&mut self, bound: Self) {
        *self = bound;
    }
}

/// Resolves command objects for one controller.
///
/// Holds only shared, immutable collaborators: one resolver can serve any
/// number of requests concurrently, and any number of parameters within a
/// request.
#[derive(Clone)]
pub struct CommandObjectResolver {
    owner: String,
    classifier: Arc<dyn EntityClassifier>,
    loader: Arc<dyn EntityLoader>,
    sources: Arc<dyn BindingSourceFactory>,
    scoper: Arc<dyn PrefixScoper>,
    fallback_identifier: Arc<dyn FallbackIdentifierExtractor>,
    binder: Arc<dyn DataBinder>,
    injector: Arc<dyn DependencyInjector>,
    exception_handlers: Arc<dyn ExceptionHandlerLookup>,
}

impl fmt::Debug for CommandObjectResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandObjectResolver")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl CommandObjectResolver {
    /// Starts a builder for the controller named `owner`.
    ///
    /// The owner name prefixes load-failure error codes and selects the
    /// exception handlers consulted on failure.
    pub fn builder(owner: impl Into<String>) -> ResolverBuilder {
        ResolverBuilder::new(owner)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Error code recorded when loading the `prefix` command object fails.
    pub fn load_error_code(&self, prefix: &str) -> String {
        format!("{}.commandObject.{}.error", self.owner, prefix)
    }

    /// Resolves the command object bound to the parameter named `prefix`.
    ///
    /// `Ok(None)` means no instance applies: the entity failed to load, or
    /// a persistent entity without identifier was requested by a method
    /// other than `POST`. `Err` is returned only for failures the owner
    /// registered a handler for.
    pub fn resolve<T: CommandObject>(
        &self,
        ctx: &mut RequestContext,
        prefix: &str,
    ) -> Result<Option<T>, ResolveError> {
        let target = TargetType::of::<T>();
        let outcome = self
            .initialize::<T>(ctx, &target, prefix)
            .and_then(|instance| match instance {
                Some(mut instance) => {
                    self.inject(&mut instance)?;
                    Ok(Some(instance))
                }
                None => Ok(None),
            });

        match outcome {
            Ok(instance) => Ok(instance),
            Err(err) if self.exception_handlers.has_handler(&self.owner, &err.kind) => {
                debug!(
                    target: RESOLVE_TARGET,
                    owner = %self.owner,
                    entity = target.short_name(),
                    kind = %err.kind,
                    "propagating to registered exception handler"
                );
                Err(err)
            }
            Err(err) => Ok(Some(self.recover::<T>(&target, prefix, &err))),
        }
    }

    /// Binds `source` onto an existing command object, honouring `filter`.
    ///
    /// Only the bound fields change. When the binder's coercions do not fit
    /// the type, each changed field is retried with its raw request value
    /// before binding fails.
    pub fn bind_data<T: CommandObject>(
        &self,
        instance: &mut T,
        source: &BindingSource,
        filter: &BindingFilter,
    ) -> Result<(), ResolveError> {
        let entity = TargetType::of::<T>().short_name();
        let original = serde_json::to_value(&*instance).map_err(|e| {
            ResolveError::instantiation(format!("cannot convert {} for binding: {}", entity, e))
                .with_source(e)
        })?;
        let mut value = original.clone();
        self.binder.bind(&mut value, source, filter)?;

        let bound = match serde_json::from_value::<T>(value.clone()) {
            Ok(bound) => bound,
            Err(err) => {
                debug!(target: RESOLVE_TARGET, entity, error = %err, "retrying binding field by field");
                bind_field_by_field(entity, &original, &value, source)?
            }
        };

        let errors = instance.errors_mut().map(std::mem::take);
        instance.accept_bound(bound);
        if let (Some(errors), Some(slot)) = (errors, instance.errors_mut()) {
            *slot = errors;
        }
        Ok(())
    }

    fn initialize<T: CommandObject>(
        &self,
        ctx: &mut RequestContext,
        target: &TargetType,
        prefix: &str,
    ) -> Result<Option<T>, ResolveError> {
        let source = self
            .sources
            .create(target, &ctx.request)?
            .map(|source| self.scoper.scope(prefix, source));
        let persistent = self.classifier.is_persistent(target);
        let identifier = if persistent {
            let raw = source
                .as_ref()
                .and_then(|s| s.identifier_value())
                .filter(|v| !v.is_null())
                .cloned()
                .or_else(|| self.fallback_identifier.extract(&ctx.request));
            normalize_identifier(raw)
        } else {
            None
        };
        let method = ctx.method();

        debug!(
            target: RESOLVE_TARGET,
            entity = target.short_name(),
            prefix,
            persistent,
            %method,
            identifier = ?identifier.as_ref().map(Identifier::value),
            "resolving command object"
        );

        let mut instance = match &identifier {
            Some(id) => self.load::<T>(ctx, target, prefix, id),
            None if method == HttpMethod::Post || !persistent => Some(T::default()),
            None => None,
        };

        if let (Some(instance), Some(source)) = (instance.as_mut(), source.as_ref()) {
            if identifier.is_none() || method.binds_existing() {
                debug!(target: RESOLVE_TARGET, prefix, fields = source.len(), "binding request data");
                self.bind_data(instance, source, &BindingFilter::all())?;
            }
        }
        Ok(instance)
    }

    fn load<T: CommandObject>(
        &self,
        ctx: &mut RequestContext,
        target: &TargetType,
        prefix: &str,
        id: &Identifier,
    ) -> Option<T> {
        let loaded = self.loader.load(target, id).and_then(|boxed| {
            boxed
                .downcast::<T>()
                .map(|instance| *instance)
                .map_err(|_| LoadError::TypeMismatch(target.name()))
        });
        match loaded {
            Ok(instance) => Some(instance),
            Err(err) => {
                warn!(
                    target: RESOLVE_TARGET,
                    entity = target.short_name(),
                    %id,
                    error = %err,
                    "failed to load command object"
                );
                if let Some(errors) = ctx.errors_mut() {
                    errors.reject(self.load_error_code(prefix), err.to_string());
                }
                None
            }
        }
    }

    fn inject<T: CommandObject>(&self, instance: &mut T) -> Result<(), ResolveError> {
        instance.autowire(self.injector.as_ref())
    }

    fn recover<T: CommandObject>(&self, target: &TargetType, prefix: &str, err: &ResolveError) -> T {
        warn!(
            target: RESOLVE_TARGET,
            entity = target.short_name(),
            prefix,
            kind = %err.kind,
            error = %err.message,
            "command object initialization failed; substituting default instance"
        );
        let mut fresh = T::default();
        attach_error(&mut fresh, prefix, &err.message);
        if let Err(inject_err) = self.inject(&mut fresh) {
            warn!(
                target: RESOLVE_TARGET,
                entity = target.short_name(),
                error = %inject_err.message,
                "autowiring the substitute instance failed"
            );
            attach_error(&mut fresh, prefix, &inject_err.message);
        }
        fresh
    }
}

fn attach_error<T: CommandObject>(instance: &mut T, prefix: &str, message: &str) {
    if let Some(errors) = instance.errors_mut() {
        errors.push(FieldError::new(
            prefix,
            format!(
                "Error occurred initializing command object [{}]. {}",
                prefix, message
            ),
        ));
    }
}

/// Applies the fields the binder changed one at a time on top of the
/// instance's own form. A field whose coerced value does not deserialize
/// falls back to the raw request value; if neither fits, binding fails
/// naming that field.
fn bind_field_by_field<T: DeserializeOwned>(
    entity: &str,
    original: &Value,
    bound: &Value,
    source: &BindingSource,
) -> Result<T, ResolveError> {
    let (Value::Object(original), Value::Object(bound)) = (original, bound) else {
        return serde_json::from_value(bound.clone()).map_err(|e| bind_error(entity, None, e));
    };

    let mut merged = original.clone();
    for (name, value) in bound {
        if original.get(name) == Some(value) {
            continue;
        }
        let mut candidates = vec![value];
        if let Some(raw) = source.get(name).filter(|raw| *raw != value) {
            candidates.push(raw);
        }

        let mut failure = None;
        for candidate in candidates {
            merged.insert(name.clone(), candidate.clone());
            match serde_json::from_value::<T>(Value::Object(merged.clone())) {
                Ok(_) => {
                    failure = None;
                    break;
                }
                Err(e) => failure = Some(e),
            }
        }
        if let Some(e) = failure {
            return Err(bind_error(entity, Some(name.as_str()), e));
        }
    }

    serde_json::from_value(Value::Object(merged)).map_err(|e| bind_error(entity, None, e))
}

fn bind_error(entity: &str, field: Option<&str>, err: serde_json::Error) -> ResolveError {
    let message = match field {
        Some(field) => format!("cannot bind request field '{}' to {}: {}", field, entity, err),
        None => format!("cannot bind request data to {}: {}", entity, err),
    };
    ResolveError::binding(message).with_source(err)
}

/// Builder for [`CommandObjectResolver`].
///
/// Every collaborator has a default:
///
/// | Collaborator | Default |
/// |--------------|---------|
/// | classifier / loader | empty [`EntityRegistry`] (no persistent types) |
/// | binding sources | [`RequestBindingSourceFactory`] |
/// | prefix scoper | [`NestedPrefixScoper`] |
/// | fallback identifier | [`PathIdentifier`](crate::PathIdentifier) on `identifier_param` |
/// | binder | [`JsonBinder`] |
/// | dependencies | empty [`Dependencies`] |
/// | exception handlers | empty [`ExceptionHandlers`] |
pub struct ResolverBuilder {
    owner: String,
    config: ResolverConfig,
    classifier: Option<Arc<dyn EntityClassifier>>,
    loader: Option<Arc<dyn EntityLoader>>,
    sources: Option<Arc<dyn BindingSourceFactory>>,
    scoper: Option<Arc<dyn PrefixScoper>>,
    fallback_identifier: Option<Arc<dyn FallbackIdentifierExtractor>>,
    binder: Option<Arc<dyn DataBinder>>,
    injector: Option<Arc<dyn DependencyInjector>>,
    exception_handlers: Option<Arc<dyn ExceptionHandlerLookup>>,
}

impl ResolverBuilder {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            config: ResolverConfig::default(),
            classifier: None,
            loader: None,
            sources: None,
            scoper: None,
            fallback_identifier: None,
            binder: None,
            injector: None,
            exception_handlers: None,
        }
    }

    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `registry` both to classify types and to load them.
    pub fn entities(mut self, registry: EntityRegistry) -> Self {
        let registry = Arc::new(registry);
        self.classifier = Some(registry.clone());
        self.loader = Some(registry);
        self
    }

    pub fn classifier<C: EntityClassifier + 'static>(mut self, classifier: C) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    pub fn loader<L: EntityLoader + 'static>(mut self, loader: L) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn binding_sources<F: BindingSourceFactory + 'static>(mut self, factory: F) -> Self {
        self.sources = Some(Arc::new(factory));
        self
    }

    pub fn prefix_scoper<S: PrefixScoper + 'static>(mut self, scoper: S) -> Self {
        self.scoper = Some(Arc::new(scoper));
        self
    }

    pub fn fallback_identifier<E: FallbackIdentifierExtractor + 'static>(
        mut self,
        extractor: E,
    ) -> Self {
        self.fallback_identifier = Some(Arc::new(extractor));
        self
    }

    pub fn binder<B: DataBinder + 'static>(mut self, binder: B) -> Self {
        self.binder = Some(Arc::new(binder));
        self
    }

    pub fn dependencies<D: DependencyInjector + 'static>(mut self, injector: D) -> Self {
        self.injector = Some(Arc::new(injector));
        self
    }

    pub fn exception_handlers<H: ExceptionHandlerLookup + 'static>(mut self, handlers: H) -> Self {
        self.exception_handlers = Some(Arc::new(handlers));
        self
    }

    pub fn build(self) -> CommandObjectResolver {
        let registry = Arc::new(EntityRegistry::new());
        CommandObjectResolver {
            classifier: self.classifier.unwrap_or_else(|| registry.clone()),
            loader: self.loader.unwrap_or(registry),
            sources: self
                .sources
                .unwrap_or_else(|| Arc::new(RequestBindingSourceFactory)),
            scoper: self.scoper.unwrap_or_else(|| Arc::new(NestedPrefixScoper)),
            fallback_identifier: self
                .fallback_identifier
                .unwrap_or_else(|| Arc::new(self.config.fallback_identifier())),
            binder: self.binder.unwrap_or_else(|| Arc::new(JsonBinder)),
            injector: self
                .injector
                .unwrap_or_else(|| Arc::new(Dependencies::new())),
            exception_handlers: self
                .exception_handlers
                .unwrap_or_else(|| Arc::new(ExceptionHandlers::new())),
            owner: self.owner,
        }
    }
}
