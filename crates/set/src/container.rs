use std::fmt;
use std::sync::Arc;

use blockspace_common::{Access, Compute, DataView, DeviceType, Error, Result};

use crate::backend::Backend;
use crate::field::BoundaryExchange;
use crate::kind::ExecutionKind;
use crate::loader::Loader;
use crate::token::Token;

/// Executable work bound to a stream index and a data view.
pub type Launch = Arc<dyn Fn(usize, DataView) -> Result<()> + Send + Sync>;

/// What a build closure hands back to [`Container::factory`].
///
/// The shape must agree with the requested [`ExecutionKind`].
pub enum Body {
    /// One launch path, used by `Device`, `DeviceManaged` and `HostManaged`.
    Launch(Launch),
    /// Both paths of a `DeviceThenHostManaged` Container.
    DeviceThenHost { device: Launch, host: Launch },
    /// No body, only valid for `None`.
    Empty,
}

impl Body {
    pub fn launch<F>(f: F) -> Self
    where
        F: Fn(usize, DataView) -> Result<()> + Send + Sync + 'static,
    {
        Self::Launch(Arc::new(f))
    }

    pub fn device_then_host<D, H>(device: D, host: H) -> Self
    where
        D: Fn(usize, DataView) -> Result<()> + Send + Sync + 'static,
        H: Fn(usize, DataView) -> Result<()> + Send + Sync + 'static,
    {
        Self::DeviceThenHost {
            device: Arc::new(device),
            host: Arc::new(host),
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Body::Launch(_) => "single launch",
            Body::DeviceThenHost { .. } => "device and host launches",
            Body::Empty => "empty body",
        }
    }
}

struct Inner {
    name: String,
    kind: ExecutionKind,
    tokens: Vec<Token>,
    body: Body,
    device_type: DeviceType,
    device_count: usize,
}

/// A schedulable unit: a named body, its recorded field accesses, and the
/// kind that tells a scheduler how to dispatch it.
///
/// Cloning is cheap; clones refer to the same unit.
#[derive(Clone)]
pub struct Container {
    inner: Arc<Inner>,
}

impl Container {
    /// Build a Container by running the access-declaration closure once.
    ///
    /// The closure loads every field through the [`Loader`] and returns the
    /// body that captured the resulting partitions. Usage errors raised while
    /// declaring accesses abort construction; nothing is executed here.
    pub fn factory<B>(
        backend: &Backend,
        name: impl Into<String>,
        kind: ExecutionKind,
        build: B,
    ) -> Result<Self>
    where
        B: FnOnce(&mut Loader) -> Result<Body>,
    {
        let name = name.into();
        let mut loader = Loader::new(&name, backend);
        let body = build(&mut loader)?;
        check_shape(&name, kind, &body)?;
        let tokens = loader.into_tokens();

        if let Some(t) = tokens
            .iter()
            .find(|t| t.access() == Access::Write && t.compute() == Compute::Stencil)
        {
            return Err(Error::usage_pattern(
                "Container",
                format!(
                    "container `{name}` both writes and stencil-reads field `{}`",
                    t.field_name()
                ),
            ));
        }

        tracing::debug!(container = %name, %kind, tokens = tokens.len(), "container built");
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                kind,
                tokens,
                body,
                device_type: backend.device_type(),
                device_count: backend.device_count(),
            }),
        })
    }

    /// A `None` Container: an ordering point with no body.
    pub fn placeholder(backend: &Backend, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                kind: ExecutionKind::None,
                tokens: Vec::new(),
                body: Body::Empty,
                device_type: backend.device_type(),
                device_count: backend.device_count(),
            }),
        }
    }

    /// Host-managed unit that runs a field's boundary exchange.
    pub(crate) fn boundary_exchange(
        backend: &Backend,
        name: impl Into<String>,
        exchange: Arc<dyn BoundaryExchange>,
    ) -> Self {
        let launch: Launch = Arc::new(move |stream, _dv| exchange.exchange(stream));
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                kind: ExecutionKind::HostManaged,
                tokens: Vec::new(),
                body: Body::Launch(launch),
                device_type: backend.device_type(),
                device_count: backend.device_count(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> ExecutionKind {
        self.inner.kind
    }

    pub fn tokens(&self) -> &[Token] {
        &self.inner.tokens
    }

    /// Device kind of the backend this Container was built against.
    pub fn device_type(&self) -> DeviceType {
        self.inner.device_type
    }

    /// Whether any token reads a field through stencil offsets.
    pub fn has_stencil_reads(&self) -> bool {
        self.inner
            .tokens
            .iter()
            .any(|t| t.compute() == Compute::Stencil && t.access() == Access::Read)
    }

    /// Whether running over `data_view` needs neighbor data exchanged first.
    pub fn needs_exchange(&self, data_view: DataView) -> bool {
        data_view == DataView::Boundary || self.inner.device_count > 1
    }

    /// Exchange units that must complete before this Container runs over
    /// `data_view`.
    pub fn required_exchanges(&self, data_view: DataView) -> Vec<&Container> {
        if !self.needs_exchange(data_view) {
            return Vec::new();
        }
        self.inner
            .tokens
            .iter()
            .filter_map(Token::exchange)
            .collect()
    }

    /// Run the required boundary exchanges, then the body.
    pub fn run(&self, stream: usize, data_view: DataView) -> Result<()> {
        for exchange in self.required_exchanges(data_view) {
            if exchange.kind().is_dispatchable() {
                exchange.run_body(stream, data_view)?;
            }
        }
        self.run_body(stream, data_view)
    }

    /// Run the body alone. Ordering against other units is the caller's job.
    pub fn run_body(&self, stream: usize, data_view: DataView) -> Result<()> {
        let _span = tracing::trace_span!(
            "container",
            name = %self.inner.name,
            kind = %self.inner.kind,
            %data_view
        )
        .entered();
        match &self.inner.body {
            Body::Empty => {
                tracing::warn!("none container invoked directly; nothing to run");
                Ok(())
            }
            Body::Launch(launch) => launch(stream, data_view),
            Body::DeviceThenHost { device, host } => match self.inner.device_type {
                DeviceType::Accelerator => device(stream, data_view),
                DeviceType::Cpu => host(stream, data_view),
            },
        }
    }

    /// The host path of a `DeviceThenHostManaged` Container as a standalone
    /// `HostManaged` unit with the same tokens.
    pub fn host_container(&self) -> Result<Container> {
        match &self.inner.body {
            Body::DeviceThenHost { host, .. } => Ok(Self {
                inner: Arc::new(Inner {
                    name: format!("{}::host", self.inner.name),
                    kind: ExecutionKind::HostManaged,
                    tokens: self.inner.tokens.clone(),
                    body: Body::Launch(host.clone()),
                    device_type: self.inner.device_type,
                    device_count: self.inner.device_count,
                }),
            }),
            _ => Err(Error::configuration(
                "Container",
                format!(
                    "host container requested from `{}` of kind {}",
                    self.inner.name, self.inner.kind
                ),
            )),
        }
    }
}

fn check_shape(name: &str, kind: ExecutionKind, body: &Body) -> Result<()> {
    let ok = match kind {
        ExecutionKind::Device | ExecutionKind::DeviceManaged | ExecutionKind::HostManaged => {
            matches!(body, Body::Launch(_))
        }
        ExecutionKind::DeviceThenHostManaged => matches!(body, Body::DeviceThenHost { .. }),
        ExecutionKind::None => matches!(body, Body::Empty),
    };
    if ok {
        Ok(())
    } else {
        Err(Error::configuration(
            "Container",
            format!("container `{name}` of kind {kind} cannot carry a {}", body.shape()),
        ))
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("tokens", &self.inner.tokens.len())
            .finish()
    }
}
