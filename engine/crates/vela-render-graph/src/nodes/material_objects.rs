//! 把默认材质 data store 中的对象数据写入每帧的 uniform buffer
//!
//! buffer 大小按 `max_uniform_buffer_range` 的整数倍分配，并多预留 1/16 的容量。
//! 对象数量超过容量时才重新分配，容量只增不减。

use std::mem::size_of;

use uuid::Uuid;
use vela_gfx::RenderHandle;
use vela_gfx::handle::RenderHandleReference;
use vela_gfx::resource_desc::{GpuBufferDesc, align_up};
use vela_render_interface::render_data_store::{MaterialUniform, MeshUniform, SkinJointUniform, SubmeshUniform};
use vela_render_interface::{DefaultMaterialDataStore, ObjectCounts, RenderCommandList};

use crate::context::RenderNodeContext;
use crate::error::NodeError;
use crate::node::{ExecuteFlags, RenderNode, RenderNodeType};

const OVER_ESTIMATE_DIVIDER: u64 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectBufferKind {
    Mesh,
    Submesh,
    Skin,
    Material,
}
impl ObjectBufferKind {
    pub const ALL: [ObjectBufferKind; 4] = [Self::Mesh, Self::Submesh, Self::Skin, Self::Material];

    pub fn stride(self) -> u64 {
        let size = match self {
            Self::Mesh => size_of::<MeshUniform>(),
            Self::Submesh => size_of::<SubmeshUniform>(),
            Self::Skin => size_of::<SkinJointUniform>(),
            Self::Material => size_of::<MaterialUniform>(),
        };
        size as u64
    }

    /// 节点私有 buffer 名字的后缀
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Mesh => "mesh_ubo",
            Self::Submesh => "submesh_ubo",
            Self::Skin => "skin_ubo",
            Self::Material => "material_ubo",
        }
    }

    fn count_of(self, counts: &ObjectCounts) -> u32 {
        match self {
            Self::Mesh => counts.mesh_count,
            Self::Submesh => counts.submesh_count,
            Self::Skin => counts.skin_count,
            Self::Material => counts.material_count,
        }
    }
}

struct ObjectBuffer {
    buffer: RenderHandleReference,
    /// 可容纳的对象数量
    capacity: u32,
}

#[derive(Default)]
pub struct RenderNodeDefaultMaterialObjects {
    data_store_name: String,
    max_uniform_range: u64,
    buffers: Vec<ObjectBuffer>,
    reallocation_count: u32,
    /// 所有 buffer 都创建成功
    valid: bool,
}
impl RenderNodeType for RenderNodeDefaultMaterialObjects {
    const UID: Uuid = Uuid::from_u128(0x6a1f_52c3_9d07_4e8b_a2d4_51c0_e3f9_7b01);
    const TYPE_NAME: &'static str = "RenderNodeDefaultMaterialObjects";
}
// getters
impl RenderNodeDefaultMaterialObjects {
    pub fn capacity(&self, kind: ObjectBufferKind) -> u32 {
        self.buffers.get(kind as usize).map(|b| b.capacity).unwrap_or(0)
    }

    pub fn buffer_handle(&self, kind: ObjectBufferKind) -> RenderHandle {
        self.buffers.get(kind as usize).map(|b| b.buffer.handle()).unwrap_or_default()
    }

    /// init 之后重新分配的次数
    #[inline]
    pub fn reallocation_count(&self) -> u32 {
        self.reallocation_count
    }
}
// tools
impl RenderNodeDefaultMaterialObjects {
    /// 对象数量对应的 buffer 大小，至少为一个 `max_uniform_range`
    fn required_byte_size(count: u32, stride: u64, max_uniform_range: u64) -> u64 {
        let count = u64::from(count.max(1));
        let with_headroom = count + count / OVER_ESTIMATE_DIVIDER;
        align_up(with_headroom.saturating_mul(stride), max_uniform_range.max(1))
    }

    fn capacity_of(byte_size: u64, stride: u64) -> u32 {
        u32::try_from(byte_size / stride).unwrap_or(u32::MAX)
    }
}
impl RenderNode for RenderNodeDefaultMaterialObjects {
    fn init_node(&mut self, ctx: &mut RenderNodeContext<'_>) -> Result<(), NodeError> {
        self.valid = false;
        self.data_store_name = ctx.param_str("data_store").unwrap_or(DefaultMaterialDataStore::DEFAULT_NAME).to_string();

        let gpu = ctx.gpu_resource_manager();
        self.max_uniform_range = gpu.limits().max_uniform_buffer_range;
        self.buffers.clear();
        for kind in ObjectBufferKind::ALL {
            let name = ctx.local_name(kind.suffix());
            let byte_size = Self::required_byte_size(0, kind.stride(), self.max_uniform_range);
            let buffer = gpu.create_buffer(&name, &GpuBufferDesc::dynamic_uniform(byte_size));
            if !buffer.is_valid() {
                return Err(NodeError::ResourceCreation(name));
            }
            self.buffers.push(ObjectBuffer {
                buffer,
                capacity: Self::capacity_of(byte_size, kind.stride()),
            });
        }
        self.valid = true;
        Ok(())
    }

    fn pre_execute_frame(&mut self, ctx: &mut RenderNodeContext<'_>) {
        let counts = ctx
            .render_data_store_manager()
            .get::<DefaultMaterialDataStore>(&self.data_store_name)
            .map(DefaultMaterialDataStore::object_counts)
            .unwrap_or_default();

        let gpu = ctx.gpu_resource_manager();
        for (kind, object_buffer) in ObjectBufferKind::ALL.into_iter().zip(&mut self.buffers) {
            let count = kind.count_of(&counts);
            if count <= object_buffer.capacity {
                continue;
            }
            let byte_size = Self::required_byte_size(count, kind.stride(), self.max_uniform_range);
            if gpu.recreate_buffer(&object_buffer.buffer, &GpuBufferDesc::dynamic_uniform(byte_size)) {
                let capacity = Self::capacity_of(byte_size, kind.stride());
                log::debug!(
                    "[{}] {kind:?} buffer grown {} -> {capacity} objects",
                    ctx.node_name(),
                    object_buffer.capacity
                );
                object_buffer.capacity = capacity;
                self.reallocation_count += 1;
            }
        }
    }

    fn execute_flags(&self) -> ExecuteFlags {
        if self.valid { ExecuteFlags::empty() } else { ExecuteFlags::DO_NOT_EXECUTE }
    }

    fn execute_frame(&mut self, ctx: &mut RenderNodeContext<'_>, _cmd_list: &mut RenderCommandList) {
        let Some(store) = ctx.render_data_store_manager().get::<DefaultMaterialDataStore>(&self.data_store_name)
        else {
            return;
        };
        let gpu = ctx.gpu_resource_manager();
        for (kind, object_buffer) in ObjectBufferKind::ALL.into_iter().zip(&self.buffers) {
            let capacity = object_buffer.capacity as usize;
            let mut mapped = match gpu.map_buffer(object_buffer.buffer.handle()) {
                Ok(mapped) => mapped,
                Err(err) => {
                    log::warn!("[{}] failed to map {kind:?} buffer: {err}", ctx.node_name());
                    continue;
                }
            };
            let result = match kind {
                ObjectBufferKind::Mesh => mapped.write_slice(0, &store.meshes[..store.meshes.len().min(capacity)]),
                ObjectBufferKind::Submesh => {
                    mapped.write_slice(0, &store.submeshes[..store.submeshes.len().min(capacity)])
                }
                ObjectBufferKind::Skin => mapped.write_slice(0, &store.skins[..store.skins.len().min(capacity)]),
                ObjectBufferKind::Material => {
                    mapped.write_slice(0, &store.materials[..store.materials.len().min(capacity)])
                }
            };
            if let Err(err) = result {
                log::warn!("[{}] failed to write {kind:?} buffer: {err}", ctx.node_name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Mat4;

    use super::*;
    use crate::nodes::test_utils::NodeHarness;

    fn set_mesh_count(harness: &mut NodeHarness, count: usize) {
        let store = harness
            .stores
            .get_mut::<DefaultMaterialDataStore>(DefaultMaterialDataStore::DEFAULT_NAME)
            .unwrap();
        store.meshes = (0..count)
            .map(|i| MeshUniform {
                world_from_model: Mat4::from_translation(glam::Vec3::new(i as f32, 0.0, 0.0)),
                ..Default::default()
            })
            .collect();
    }

    #[test]
    fn test_required_byte_size() {
        // 128 字节的 mesh，一个 64KiB 的块可以放 512 个
        assert_eq!(RenderNodeDefaultMaterialObjects::required_byte_size(0, 128, 65536), 65536);
        assert_eq!(RenderNodeDefaultMaterialObjects::required_byte_size(480, 128, 65536), 65536);
        // 1000 + 62 个 -> 135936 字节 -> 3 个块
        assert_eq!(RenderNodeDefaultMaterialObjects::required_byte_size(1000, 128, 65536), 3 * 65536);
        // 预留容量不会在 u32 上溢出
        assert_eq!(
            RenderNodeDefaultMaterialObjects::required_byte_size(u32::MAX, 128, 65536),
            584_115_552_256
        );
        assert_eq!(RenderNodeDefaultMaterialObjects::capacity_of(584_115_552_256, 128), u32::MAX);
    }

    #[test]
    fn test_init_creates_local_buffers() {
        let mut harness = NodeHarness::new(2);
        let mut node = RenderNodeDefaultMaterialObjects::default();
        node.init_node(&mut harness.ctx()).unwrap();

        for kind in ObjectBufferKind::ALL {
            let name = format!("graph_node_{}", kind.suffix());
            let handle = harness.gpu.get_buffer_handle(&name).unwrap();
            assert_eq!(handle.handle(), node.buffer_handle(kind));
            assert_eq!(node.capacity(kind) as u64, 65536 / kind.stride());
        }
        assert_eq!(node.capacity(ObjectBufferKind::Skin), 16);
    }

    #[test]
    fn test_capacity_grows_monotonically() {
        let mut harness = NodeHarness::new(2);
        harness.stores.register(Box::new(DefaultMaterialDataStore::default()));
        let mut node = RenderNodeDefaultMaterialObjects::default();
        node.init_node(&mut harness.ctx()).unwrap();

        let mut previous_capacity = node.capacity(ObjectBufferKind::Mesh);
        let mut reallocations = 0;
        for count in [10, 500, 300, 1000, 900, 1500, 1600, 20] {
            harness.begin_frame();
            set_mesh_count(&mut harness, count);
            node.pre_execute_frame(&mut harness.ctx());

            let capacity = node.capacity(ObjectBufferKind::Mesh);
            assert!(capacity >= previous_capacity, "capacity shrank at count {count}");
            assert!(capacity as usize >= count);
            if count as u32 > previous_capacity {
                reallocations += 1;
            } else {
                assert_eq!(capacity, previous_capacity, "unexpected reallocation at count {count}");
            }
            previous_capacity = capacity;
            harness.end_frame();
        }
        // 1000 -> 1536，1600 -> 2048
        assert_eq!(reallocations, 2);
        assert_eq!(node.reallocation_count(), 2);
        assert_eq!(node.capacity(ObjectBufferKind::Mesh), 2048);
        // 其他 buffer 的对象数量为 0，不会重新分配
        assert_eq!(node.capacity(ObjectBufferKind::Material), 1024);
    }

    #[test]
    fn test_execute_writes_store_data() {
        let mut harness = NodeHarness::new(2);
        harness.stores.register(Box::new(DefaultMaterialDataStore::default()));
        let mut node = RenderNodeDefaultMaterialObjects::default();
        node.init_node(&mut harness.ctx()).unwrap();

        harness.begin_frame();
        set_mesh_count(&mut harness, 3);
        node.pre_execute_frame(&mut harness.ctx());
        let mut cmd_list = RenderCommandList::new("node", true);
        node.execute_frame(&mut harness.ctx(), &mut cmd_list);

        let resolved = harness.gpu.resolve_buffer(node.buffer_handle(ObjectBufferKind::Mesh)).unwrap();
        let bytes = harness.backend.read_buffer(resolved.id).unwrap();
        let offset = resolved.offset as usize;
        let store = harness
            .stores
            .get::<DefaultMaterialDataStore>(DefaultMaterialDataStore::DEFAULT_NAME)
            .unwrap();
        let expected: &[u8] = bytemuck::cast_slice(&store.meshes);
        assert_eq!(&bytes[offset..offset + expected.len()], expected);
        assert!(cmd_list.is_empty());
        harness.end_frame();
    }

    #[test]
    fn test_missing_store_is_tolerated() {
        let mut harness = NodeHarness::new(2);
        harness.params = serde_json::json!({ "data_store": "does_not_exist" });
        let mut node = RenderNodeDefaultMaterialObjects::default();
        node.init_node(&mut harness.ctx()).unwrap();

        harness.begin_frame();
        node.pre_execute_frame(&mut harness.ctx());
        assert_eq!(node.execute_flags(), ExecuteFlags::empty());
        let mut cmd_list = RenderCommandList::new("node", true);
        node.execute_frame(&mut harness.ctx(), &mut cmd_list);
        assert_eq!(node.reallocation_count(), 0);
        harness.end_frame();
    }

    #[test]
    fn test_partial_init_failure_disables_execution() {
        let mut harness = NodeHarness::new(2);
        let mut node = RenderNodeDefaultMaterialObjects::default();
        node.init_node(&mut harness.ctx()).unwrap();
        assert_eq!(node.execute_flags(), ExecuteFlags::empty());

        // mesh buffer 仍然存活，可以复用；其余 buffer 需要重新分配但后端已锁定
        let mesh = harness.gpu.get_buffer_handle("graph_node_mesh_ubo").unwrap();
        harness.resources.push(mesh);
        harness.gpu.set_lock_resource_backend_access(true);
        assert!(matches!(
            node.init_node(&mut harness.ctx()),
            Err(NodeError::ResourceCreation(name)) if name == "graph_node_submesh_ubo"
        ));
        assert_eq!(node.capacity(ObjectBufferKind::Mesh), 512);
        assert_eq!(node.execute_flags(), ExecuteFlags::DO_NOT_EXECUTE);

        harness.gpu.set_lock_resource_backend_access(false);
        node.init_node(&mut harness.ctx()).unwrap();
        assert_eq!(node.execute_flags(), ExecuteFlags::empty());
    }
}
