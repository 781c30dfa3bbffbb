//! Minimal collaborators for unit tests

use crate::class::{ClassLoader, ClassRef, GuestClass, LoaderRef, Method, MethodRef};
use crate::exception::GuestException;
use crate::value::Value;
use crate::vm::{RuntimeState, StepOutcome};
use crate::VmResult;
use std::ops::Range;
use std::sync::Arc;

pub(crate) struct TestLoader {
    name: String,
}

impl TestLoader {
    pub(crate) fn named(name: &str) -> LoaderRef {
        Arc::new(TestLoader {
            name: name.to_string(),
        })
    }
}

impl ClassLoader for TestLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_initialized_class(&self, name: &str, _allow_null: bool) -> VmResult<Option<ClassRef>> {
        Ok(Some(TestClass::bare(name)))
    }
}

pub(crate) struct TestClass {
    name: String,
    loader: Option<LoaderRef>,
}

impl TestClass {
    pub(crate) fn bare(name: &str) -> ClassRef {
        Arc::new(TestClass {
            name: name.to_string(),
            loader: None,
        })
    }

    pub(crate) fn with_loader(name: &str, loader: &str) -> ClassRef {
        Arc::new(TestClass {
            name: name.to_string(),
            loader: Some(TestLoader::named(loader)),
        })
    }
}

impl GuestClass for TestClass {
    fn name(&self) -> &str {
        &self.name
    }

    fn loader(&self) -> Option<LoaderRef> {
        self.loader.clone()
    }

    fn method_lookup(&self, _signature: &str) -> Option<MethodRef> {
        None
    }

    fn static_field(&self, _name: &str) -> Option<Value> {
        None
    }

    fn set_static_field(&self, _name: &str, _value: Value) {}
}

pub(crate) struct TestMethod {
    signature: String,
    class: Option<ClassRef>,
    handler: Option<(Range<usize>, usize)>,
}

impl TestMethod {
    pub(crate) fn bytecode(signature: &str) -> MethodRef {
        Arc::new(TestMethod {
            signature: signature.to_string(),
            class: None,
            handler: None,
        })
    }

    pub(crate) fn bytecode_in(signature: &str, class: ClassRef) -> MethodRef {
        Arc::new(TestMethod {
            signature: signature.to_string(),
            class: Some(class),
            handler: None,
        })
    }

    pub(crate) fn with_handler(signature: &str, range: Range<usize>, target: usize) -> MethodRef {
        Arc::new(TestMethod {
            signature: signature.to_string(),
            class: None,
            handler: Some((range, target)),
        })
    }
}

impl Method for TestMethod {
    fn full_signature(&self) -> &str {
        &self.signature
    }

    fn has_bytecode(&self) -> bool {
        true
    }

    fn class(&self) -> Option<ClassRef> {
        self.class.clone()
    }

    fn operand_len(&self, _pc: usize) -> Option<usize> {
        Some(0)
    }

    fn catch_target(
        &self,
        pc: usize,
        _exception: &GuestException,
        _raising: bool,
    ) -> Option<usize> {
        match &self.handler {
            Some((range, target)) if range.contains(&pc) => Some(*target),
            _ => None,
        }
    }

    fn execute(&self, _rt: &mut RuntimeState) -> VmResult<StepOutcome> {
        Ok(StepOutcome::Done)
    }
}
