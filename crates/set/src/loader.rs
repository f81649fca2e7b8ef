use blockspace_common::{Access, Compute, Error, Result};

use crate::backend::Backend;
use crate::container::Container;
use crate::field::Loadable;
use crate::token::Token;

/// Access-declaration handle passed to a Container's build closure.
///
/// Every field the kernel uses must be loaded here. Each load records a
/// [`Token`] and returns the partition the kernel captures; no data is
/// touched until the Container runs.
pub struct Loader {
    container: String,
    backend: Backend,
    tokens: Vec<Token>,
}

impl Loader {
    pub(crate) fn new(container: &str, backend: &Backend) -> Self {
        Self {
            container: container.to_owned(),
            backend: backend.clone(),
            tokens: Vec::new(),
        }
    }

    /// Name of the Container being built.
    pub fn container_name(&self) -> &str {
        &self.container
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Read-only load with map semantics.
    pub fn load<F: Loadable>(&mut self, field: &F) -> F::Partition {
        self.load_with(field, Compute::Map)
    }

    /// Read-only load with an explicit compute kind.
    ///
    /// A stencil read attaches a boundary-exchange Container to the token.
    pub fn load_with<F: Loadable>(&mut self, field: &F, compute: Compute) -> F::Partition {
        let mut token = Token::new(field.uid(), field.name(), Access::Read, compute);
        if compute == Compute::Stencil {
            token.set_exchange(self.exchange_for(field));
        }
        self.add_token(token);
        field.partition()
    }

    /// Read-write load with map semantics.
    pub fn load_mut<F: Loadable>(&mut self, field: &F) -> F::PartitionMut {
        self.add_token(Token::new(field.uid(), field.name(), Access::Write, Compute::Map));
        field.partition_mut()
    }

    /// Read-write load with an explicit compute kind.
    ///
    /// Writing a field under stencil compute would let a cell overwrite
    /// values its neighbors are still reading, so it is rejected.
    pub fn load_mut_with<F: Loadable>(
        &mut self,
        field: &F,
        compute: Compute,
    ) -> Result<F::PartitionMut> {
        if compute == Compute::Stencil {
            return Err(Error::usage_pattern(
                "Loader",
                format!(
                    "container `{}` loads field `{}` for write under stencil compute",
                    self.container,
                    field.name()
                ),
            ));
        }
        self.add_token(Token::new(field.uid(), field.name(), Access::Write, compute));
        Ok(field.partition_mut())
    }

    fn exchange_for<F: Loadable>(&self, field: &F) -> Container {
        let name = format!("{}::boundary_exchange", field.name());
        match field.boundary_exchange() {
            Some(exchange) => Container::boundary_exchange(&self.backend, name, exchange),
            None => Container::placeholder(&self.backend, name),
        }
    }

    fn add_token(&mut self, token: Token) {
        tracing::trace!(
            container = %self.container,
            field = token.field_name(),
            access = ?token.access(),
            compute = ?token.compute(),
            "token recorded"
        );
        match self.tokens.iter_mut().find(|t| t.uid() == token.uid()) {
            Some(existing) => existing.merge(token),
            None => self.tokens.push(token),
        }
    }

    pub(crate) fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }
}
