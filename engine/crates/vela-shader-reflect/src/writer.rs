//! 反射数据的写入端
//!
//! 正式的反射数据由 shader 编译器生成，这里只用于 headless 运行和测试中拼出同样格式的 blob。
//! 段按 push constants / specialization constants / descriptor sets / inputs / local size 的顺序排列。

use crate::reflection::{REFLECTION_HEADER_SIZE, SEGMENT_COUNT};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlobBinding {
    pub binding: u16,
    pub descriptor_type: u16,
    pub count: u16,
    /// 只在 version 1 中写入
    pub dimension: u8,
    pub image_flags: u8,
}
impl BlobBinding {
    pub fn new(binding: u16, descriptor_type: u16) -> Self {
        Self {
            binding,
            descriptor_type,
            count: 1,
            ..Default::default()
        }
    }
}

/// None 的段不写入，对应 offset 为 0
#[derive(Clone, Debug, Default)]
pub struct ReflectionBlobBuilder {
    pub version: u8,
    pub stage: u16,
    pub push_constant: Option<u16>,
    /// (id, type)
    pub spec_constants: Option<Vec<(u32, u32)>>,
    /// (set index, bindings)
    pub sets: Option<Vec<(u16, Vec<BlobBinding>)>>,
    /// (location, format)
    pub inputs: Option<Vec<(u16, u16)>>,
    pub local_size: Option<[u32; 3]>,
}
impl ReflectionBlobBuilder {
    pub fn new(version: u8, stage: u16) -> Self {
        Self {
            version,
            stage,
            ..Default::default()
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut segments: [Option<Vec<u8>>; SEGMENT_COUNT] = Default::default();
        segments[0] = self.push_constant.map(|size| {
            let mut bytes = vec![1];
            bytes.extend(size.to_le_bytes());
            bytes
        });
        segments[1] = self.spec_constants.as_ref().map(|constants| {
            let mut bytes = (constants.len() as u32).to_le_bytes().to_vec();
            for (id, ty) in constants {
                bytes.extend(id.to_le_bytes());
                bytes.extend(ty.to_le_bytes());
            }
            bytes
        });
        segments[2] = self.sets.as_ref().map(|sets| {
            let mut bytes = (sets.len() as u16).to_le_bytes().to_vec();
            for (set, bindings) in sets {
                bytes.extend(set.to_le_bytes());
                bytes.extend((bindings.len() as u16).to_le_bytes());
                for b in bindings {
                    bytes.extend(b.binding.to_le_bytes());
                    bytes.extend(b.descriptor_type.to_le_bytes());
                    bytes.extend(b.count.to_le_bytes());
                    if self.version == 1 {
                        bytes.push(b.dimension);
                        bytes.push(b.image_flags);
                    }
                }
            }
            bytes
        });
        segments[3] = self.inputs.as_ref().map(|inputs| {
            let mut bytes = (inputs.len() as u16).to_le_bytes().to_vec();
            for (location, format) in inputs {
                bytes.extend(location.to_le_bytes());
                bytes.extend(format.to_le_bytes());
            }
            bytes
        });
        segments[4] = self.local_size.map(|size| size.iter().flat_map(|v| v.to_le_bytes()).collect());

        let mut blob = vec![b'r', b'f', b'l', self.version];
        blob.extend(self.stage.to_le_bytes());
        let mut body: Vec<u8> = Vec::new();
        for segment in &segments {
            match segment {
                Some(bytes) => {
                    blob.extend(((REFLECTION_HEADER_SIZE + body.len()) as u16).to_le_bytes());
                    body.extend(bytes);
                }
                None => blob.extend(0u16.to_le_bytes()),
            }
        }
        blob.extend(body);
        blob
    }
}
