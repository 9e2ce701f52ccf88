//! 渲染节点类型注册表
//!
//! 由 renderer 持有并显式传入，不使用全局单例。按注册顺序保存。

use std::collections::HashMap;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::node::{RenderNode, RenderNodeType};
use crate::nodes::{RenderNodeComputeGeneric, RenderNodeDefaultMaterialObjects, RenderNodeDefaultShadowsBlur};

pub type RenderNodeFactory = fn() -> Box<dyn RenderNode>;

#[derive(Clone, Copy, Debug)]
pub struct RenderNodeTypeInfo {
    pub uid: Uuid,
    pub type_name: &'static str,
    pub factory: RenderNodeFactory,
}

fn create_node<T: RenderNodeType>() -> Box<dyn RenderNode> {
    Box::new(T::default())
}

#[derive(Default)]
pub struct RenderNodeRegistry {
    types: IndexMap<Uuid, RenderNodeTypeInfo>,
    names: HashMap<&'static str, Uuid>,
}
// new & init
impl RenderNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册了所有内置节点的注册表
    pub fn with_builtin_nodes() -> Self {
        let mut registry = Self::new();
        registry.register::<RenderNodeDefaultMaterialObjects>();
        registry.register::<RenderNodeDefaultShadowsBlur>();
        registry.register::<RenderNodeComputeGeneric>();
        registry
    }

    pub fn register<T: RenderNodeType>(&mut self) -> bool {
        self.register_info(RenderNodeTypeInfo {
            uid: T::UID,
            type_name: T::TYPE_NAME,
            factory: create_node::<T>,
        })
    }

    /// uid 或类型名已经注册时返回 false，保留先注册的类型
    pub fn register_info(&mut self, info: RenderNodeTypeInfo) -> bool {
        if self.types.contains_key(&info.uid) || self.names.contains_key(info.type_name) {
            log::warn!("render node type '{}' ({}) already registered", info.type_name, info.uid);
            return false;
        }
        self.names.insert(info.type_name, info.uid);
        self.types.insert(info.uid, info);
        log::debug!("render node type '{}' registered", info.type_name);
        true
    }

    pub fn unregister(&mut self, uid: Uuid) -> Option<RenderNodeTypeInfo> {
        let info = self.types.shift_remove(&uid)?;
        self.names.remove(info.type_name);
        Some(info)
    }
}
// getters
impl RenderNodeRegistry {
    pub fn type_info(&self, type_name: &str) -> Option<&RenderNodeTypeInfo> {
        self.types.get(self.names.get(type_name)?)
    }

    pub fn type_info_by_uid(&self, uid: Uuid) -> Option<&RenderNodeTypeInfo> {
        self.types.get(&uid)
    }

    /// 按注册顺序
    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.values().map(|info| info.type_name)
    }

    pub fn create(&self, type_name: &str) -> Option<Box<dyn RenderNode>> {
        self.type_info(type_name).map(|info| (info.factory)())
    }

    pub fn create_by_uid(&self, uid: Uuid) -> Option<Box<dyn RenderNode>> {
        self.types.get(&uid).map(|info| (info.factory)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registration_order() {
        let registry = RenderNodeRegistry::with_builtin_nodes();
        assert_eq!(
            registry.type_names().collect::<Vec<_>>(),
            vec![
                RenderNodeDefaultMaterialObjects::TYPE_NAME,
                RenderNodeDefaultShadowsBlur::TYPE_NAME,
                RenderNodeComputeGeneric::TYPE_NAME
            ]
        );
        assert!(registry.create(RenderNodeComputeGeneric::TYPE_NAME).is_some());
        assert!(registry.create_by_uid(RenderNodeDefaultShadowsBlur::UID).is_some());
        assert!(registry.create("RenderNodeUnknown").is_none());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = RenderNodeRegistry::with_builtin_nodes();
        assert!(!registry.register::<RenderNodeDefaultShadowsBlur>());

        // 同名不同 uid 也会被拒绝
        assert!(!registry.register_info(RenderNodeTypeInfo {
            uid: Uuid::from_u128(1),
            type_name: RenderNodeComputeGeneric::TYPE_NAME,
            factory: create_node::<RenderNodeComputeGeneric>,
        }));

        let removed = registry.unregister(RenderNodeComputeGeneric::UID).unwrap();
        assert_eq!(removed.type_name, RenderNodeComputeGeneric::TYPE_NAME);
        assert!(registry.type_info(RenderNodeComputeGeneric::TYPE_NAME).is_none());
        assert!(registry.register::<RenderNodeComputeGeneric>());
    }
}
