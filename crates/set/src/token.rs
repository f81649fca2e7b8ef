use blockspace_common::{Access, Compute, FieldUid};

use crate::container::Container;

/// A recorded field access of one Container.
///
/// Tokens are the edges of the dependency graph: a later Container that
/// touches the same uid is ordered after this one according to the access
/// kinds involved.
#[derive(Debug, Clone)]
pub struct Token {
    uid: FieldUid,
    field_name: String,
    access: Access,
    compute: Compute,
    exchange: Option<Container>,
}

impl Token {
    pub fn new(uid: FieldUid, field_name: impl Into<String>, access: Access, compute: Compute) -> Self {
        Self {
            uid,
            field_name: field_name.into(),
            access,
            compute,
            exchange: None,
        }
    }

    pub fn uid(&self) -> FieldUid {
        self.uid
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn compute(&self) -> Compute {
        self.compute
    }

    /// Boundary exchange that must complete before a stencil read of this
    /// field on a boundary partition.
    pub fn exchange(&self) -> Option<&Container> {
        self.exchange.as_ref()
    }

    pub(crate) fn set_exchange(&mut self, exchange: Container) {
        self.exchange = Some(exchange);
    }

    /// Fold a second access of the same field into this token. Writes win
    /// over reads and stencil wins over other compute kinds.
    pub(crate) fn merge(&mut self, other: Token) {
        debug_assert_eq!(self.uid, other.uid);
        if other.access == Access::Write {
            self.access = Access::Write;
        }
        if other.compute == Compute::Stencil {
            self.compute = Compute::Stencil;
        } else if self.compute == Compute::Map {
            self.compute = other.compute;
        }
        if self.exchange.is_none() {
            self.exchange = other.exchange;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_upgrades_access_and_compute() {
        let uid = FieldUid::new();
        let mut a = Token::new(uid, "u", Access::Read, Compute::Map);
        a.merge(Token::new(uid, "u", Access::Write, Compute::Map));
        assert_eq!(a.access(), Access::Write);
        assert_eq!(a.compute(), Compute::Map);

        let mut b = Token::new(uid, "u", Access::Read, Compute::Map);
        b.merge(Token::new(uid, "u", Access::Read, Compute::Stencil));
        assert_eq!(b.access(), Access::Read);
        assert_eq!(b.compute(), Compute::Stencil);
    }

    #[test]
    fn merge_keeps_stencil() {
        let uid = FieldUid::new();
        let mut a = Token::new(uid, "u", Access::Read, Compute::Stencil);
        a.merge(Token::new(uid, "u", Access::Read, Compute::Reduce));
        assert_eq!(a.compute(), Compute::Stencil);
    }
}
