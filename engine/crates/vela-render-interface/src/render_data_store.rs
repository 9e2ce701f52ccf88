//! render data store
//!
//! 场景侧每帧写入、渲染节点读取的数据。节点通过名字和具体类型查找 store。

use std::any::Any;

use glam::{Mat4, Vec4};
use indexmap::IndexMap;

/// 所有 render data store 需要实现的接口
///
/// 节点通过 `RenderDataStoreManager::get::<T>` 向下转型得到具体类型。
pub trait RenderDataStore: Send + Sync {
    fn name(&self) -> &str;

    /// 每帧节点执行之前调用
    fn pre_render(&mut self) {}

    /// 每帧提交之后调用，通常在这里清空本帧的数据
    fn post_render(&mut self) {}

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// 按名字保存 render data store，保持注册顺序
#[derive(Default)]
pub struct RenderDataStoreManager {
    stores: IndexMap<String, Box<dyn RenderDataStore>>,
}
impl RenderDataStoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名 store 会被替换
    pub fn register(&mut self, store: Box<dyn RenderDataStore>) {
        let name = store.name().to_string();
        if self.stores.insert(name.clone(), store).is_some() {
            log::info!("render data store '{name}' replaced");
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Box<dyn RenderDataStore>> {
        self.stores.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    pub fn get<T: RenderDataStore + 'static>(&self, name: &str) -> Option<&T> {
        self.stores.get(name)?.as_any().downcast_ref::<T>()
    }

    pub fn get_mut<T: RenderDataStore + 'static>(&mut self, name: &str) -> Option<&mut T> {
        self.stores.get_mut(name)?.as_any_mut().downcast_mut::<T>()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    pub fn pre_render(&mut self) {
        self.stores.values_mut().for_each(|store| store.pre_render());
    }

    pub fn post_render(&mut self) {
        self.stores.values_mut().for_each(|store| store.post_render());
    }
}

/// 每帧场景中对象的数量，用于确定 uniform buffer 的大小
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObjectCounts {
    pub mesh_count: u32,
    pub submesh_count: u32,
    pub skin_count: u32,
    pub material_count: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshUniform {
    pub world_from_model: Mat4,
    pub prev_world_from_model: Mat4,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SubmeshUniform {
    pub aabb_min: Vec4,
    pub aabb_max: Vec4,
    pub mesh_index: u32,
    pub material_index: u32,
    pub _padding: [u32; 2],
}

pub const MAX_SKIN_JOINT_COUNT: usize = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SkinJointUniform {
    pub joint_matrices: [Mat4; MAX_SKIN_JOINT_COUNT],
}
impl Default for SkinJointUniform {
    fn default() -> Self {
        Self {
            joint_matrices: [Mat4::IDENTITY; MAX_SKIN_JOINT_COUNT],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniform {
    pub base_color: Vec4,
    pub emissive: Vec4,
    /// metallic, roughness, alpha cutoff, unused
    pub metallic_roughness_alpha: Vec4,
    pub texture_indices: [u32; 4],
}

/// 默认材质渲染需要的每帧数据
pub struct DefaultMaterialDataStore {
    name: String,
    pub meshes: Vec<MeshUniform>,
    pub submeshes: Vec<SubmeshUniform>,
    pub skins: Vec<SkinJointUniform>,
    pub materials: Vec<MaterialUniform>,
}
impl DefaultMaterialDataStore {
    pub const DEFAULT_NAME: &'static str = "default_material_data_store";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meshes: Vec::new(),
            submeshes: Vec::new(),
            skins: Vec::new(),
            materials: Vec::new(),
        }
    }

    pub fn object_counts(&self) -> ObjectCounts {
        ObjectCounts {
            mesh_count: self.meshes.len() as u32,
            submesh_count: self.submeshes.len() as u32,
            skin_count: self.skins.len() as u32,
            material_count: self.materials.len() as u32,
        }
    }

    pub fn clear(&mut self) {
        self.meshes.clear();
        self.submeshes.clear();
        self.skins.clear();
        self.materials.clear();
    }
}
impl Default for DefaultMaterialDataStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_NAME)
    }
}
impl RenderDataStore for DefaultMaterialDataStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn post_render(&mut self) {
        self.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightUniform {
    pub position: Vec4,
    pub direction: Vec4,
    /// rgb + intensity
    pub color: Vec4,
    /// x: 类型, y: 是否投射阴影
    pub flags: [u32; 4],
}
impl LightUniform {
    #[inline]
    pub fn casts_shadow(&self) -> bool {
        self.flags[1] != 0
    }
}

pub struct LightDataStore {
    name: String,
    pub lights: Vec<LightUniform>,
}
impl LightDataStore {
    pub const DEFAULT_NAME: &'static str = "light_data_store";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lights: Vec::new(),
        }
    }

    pub fn shadow_caster_count(&self) -> u32 {
        self.lights.iter().filter(|l| l.casts_shadow()).count() as u32
    }
}
impl Default for LightDataStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_NAME)
    }
}
impl RenderDataStore for LightDataStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn post_render(&mut self) {
        self.lights.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_lookup() {
        let mut manager = RenderDataStoreManager::new();
        manager.register(Box::new(DefaultMaterialDataStore::default()));
        manager.register(Box::new(LightDataStore::default()));
        assert_eq!(manager.names().collect::<Vec<_>>(), vec![DefaultMaterialDataStore::DEFAULT_NAME, LightDataStore::DEFAULT_NAME]);

        // 类型不匹配
        assert!(manager.get::<LightDataStore>(DefaultMaterialDataStore::DEFAULT_NAME).is_none());

        let store = manager.get_mut::<DefaultMaterialDataStore>(DefaultMaterialDataStore::DEFAULT_NAME).unwrap();
        store.meshes.push(MeshUniform::default());
        store.materials.push(MaterialUniform::default());
        let counts = manager.get::<DefaultMaterialDataStore>(DefaultMaterialDataStore::DEFAULT_NAME).unwrap().object_counts();
        assert_eq!(counts.mesh_count, 1);
        assert_eq!(counts.material_count, 1);

        manager.post_render();
        let counts = manager.get::<DefaultMaterialDataStore>(DefaultMaterialDataStore::DEFAULT_NAME).unwrap().object_counts();
        assert_eq!(counts, ObjectCounts::default());
    }

    #[test]
    fn test_shadow_casters() {
        let mut lights = LightDataStore::default();
        lights.lights.push(LightUniform::default());
        lights.lights.push(LightUniform {
            flags: [0, 1, 0, 0],
            ..Default::default()
        });
        assert_eq!(lights.shadow_caster_count(), 1);
    }

    #[test]
    fn test_uniform_sizes() {
        assert_eq!(std::mem::size_of::<MeshUniform>(), 128);
        assert_eq!(std::mem::size_of::<SubmeshUniform>(), 48);
        assert_eq!(std::mem::size_of::<MaterialUniform>(), 64);
        assert_eq!(std::mem::size_of::<SkinJointUniform>(), 64 * 64);
    }
}
