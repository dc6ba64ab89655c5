use super::state::StateId;
use super::{Assembler, Env};
use crate::core::{AssemblyError, Result};
use crate::domain::{DomainBody, DomainKey, DomainType};
use crate::persistent::{DoKey, PersistentBody, PersistentType};

#[derive(Debug, Default)]
pub struct LookupAssembler;

impl LookupAssembler {
    pub fn new() -> Self {
        Self
    }
}

impl Assembler for LookupAssembler {
    fn name(&self) -> &'static str {
        "LookupAssembler"
    }

    fn domain_type(&self) -> DomainType {
        DomainType::Lookup
    }

    fn persistent_type(&self) -> PersistentType {
        PersistentType::Lookup
    }

    fn assemble_do_fields(&self, env: &mut Env<'_>, target: DoKey, source: DomainKey, _state: StateId) -> Result<()> {
        let DomainBody::Lookup { code } = &env.domain.object(source)?.body else {
            return Err(AssemblyError::TypeMismatch(format!("{} is not a lookup", source)));
        };
        match &mut env.session.graph_mut().object_mut(target)?.body {
            PersistentBody::Lookup { code: stored } => {
                if stored != code {
                    *stored = code.clone();
                }
                Ok(())
            }
            _ => Err(AssemblyError::TypeMismatch(format!("{} is not a lookup", target))),
        }
    }

    fn assemble_domain_fields(&self, env: &mut Env<'_>, target: DomainKey, source: DoKey) -> Result<()> {
        let PersistentBody::Lookup { code } = &env.session.graph().object(source)?.body else {
            return Err(AssemblyError::TypeMismatch(format!("{} is not a lookup", source)));
        };
        env.domain.object_mut(target)?.body = DomainBody::Lookup { code: code.clone() };
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct IdentityAssembler;

impl IdentityAssembler {
    pub fn new() -> Self {
        Self
    }
}

impl Assembler for IdentityAssembler {
    fn name(&self) -> &'static str {
        "IdentityAssembler"
    }

    fn domain_type(&self) -> DomainType {
        DomainType::Identity
    }

    fn persistent_type(&self) -> PersistentType {
        PersistentType::Identity
    }

    fn assemble_do_fields(&self, env: &mut Env<'_>, target: DoKey, source: DomainKey, _state: StateId) -> Result<()> {
        let DomainBody::Identity { identity } = &env.domain.object(source)?.body else {
            return Err(AssemblyError::TypeMismatch(format!("{} is not an identity", source)));
        };
        match &mut env.session.graph_mut().object_mut(target)?.body {
            PersistentBody::Identity { identity: stored } => {
                if stored != identity {
                    *stored = identity.clone();
                }
                Ok(())
            }
            _ => Err(AssemblyError::TypeMismatch(format!("{} is not an identity", target))),
        }
    }

    fn assemble_domain_fields(&self, env: &mut Env<'_>, target: DomainKey, source: DoKey) -> Result<()> {
        let PersistentBody::Identity { identity } = &env.session.graph().object(source)?.body else {
            return Err(AssemblyError::TypeMismatch(format!("{} is not an identity", source)));
        };
        env.domain.object_mut(target)?.body = DomainBody::Identity {
            identity: identity.clone(),
        };
        Ok(())
    }
}
