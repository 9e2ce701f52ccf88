pub struct FrameCounter {
    /// 当前的帧序号，从 1 开始一直累加，0 表示还没有开始任何一帧
    frame_id: u64,
    /// 同时在飞的帧数，也是 ring buffer 的深度
    buffering_count: u32,
}
// new & init
impl FrameCounter {
    pub fn new(buffering_count: u32) -> Self {
        Self {
            frame_id: 0,
            buffering_count: buffering_count.max(1),
        }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) -> u64 {
        self.frame_id += 1;
        self.frame_id
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn buffering_count(&self) -> u32 {
        self.buffering_count
    }

    /// 开始当前帧之前必须完成的帧，0 表示无需等待
    #[inline]
    pub fn frame_to_wait(&self) -> u64 {
        self.frame_id.saturating_sub(self.buffering_count as u64)
    }

    #[inline]
    pub fn ring_index(&self) -> usize {
        (self.frame_id % self.buffering_count as u64) as usize
    }

    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}-{}]", self.frame_id, self.ring_index())
    }
}
