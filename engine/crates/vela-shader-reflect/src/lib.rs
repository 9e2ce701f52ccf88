//! shader 反射数据
//!
//! 反射数据是 shader 编译器输出的一段紧凑二进制，头部带有 `'r' 'f' 'l' version` 标记。
//! 所有读取都进行边界检查，损坏的数据只会得到空结果，不会 panic。

pub mod reader;
pub mod reflection;
pub mod writer;

pub use reflection::{
    REFLECTION_HEADER_SIZE, ShaderReflectionData, SpecializationConstant, SpecializationConstantType,
    VertexInputDeclaration, VertexInputDescription,
};
pub use writer::{BlobBinding, ReflectionBlobBuilder};
pub use vela_gfx::pipeline_layout::{
    AdditionalDescriptorFlags, DescriptorSetLayout, DescriptorSetLayoutBinding, MAX_DESCRIPTOR_SET_COUNT,
    PipelineLayout, PushConstant,
};
