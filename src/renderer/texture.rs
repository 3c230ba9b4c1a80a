use crate::core::{PlayerError, Result};
use crossbeam::queue::SegQueue;
use log::{debug, error, info};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// 不透明纹理句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// RGBA8 像素缓冲；每个像素按一个 u32 存放，字节顺序保持输入顺序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pixels: Vec<u32>,
}

impl PixelBuffer {
    pub fn from_rgba(width: u32, height: u32, rgba: &[u8]) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 {
            return Err(PlayerError::Texture(format!("无效的纹理尺寸 {}x{}", width, height)));
        }
        if rgba.len() != expected {
            return Err(PlayerError::Texture(format!(
                "像素数据 {} 字节，{}x{} 需要 {} 字节",
                rgba.len(),
                width,
                height,
                expected
            )));
        }
        let pixels = rgba
            .chunks_exact(4)
            .map(|p| u32::from_ne_bytes([p[0], p[1], p[2], p[3]]))
            .collect();
        Ok(Self { width, height, pixels })
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self {
            width,
            height,
            pixels: vec![u32::from_ne_bytes(rgba); width as usize * height as usize],
        }
    }

    pub fn from_image(image: &image::RgbaImage) -> Result<Self> {
        Self::from_rgba(image.width(), image.height(), image.as_raw())
    }

    /// 按字节查看像素（RGBA 顺序）
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }
}

/// GPU 纹理上传接口
pub trait TextureUploader: Send {
    fn create_texture(&mut self, pixels: &PixelBuffer) -> Result<TextureHandle>;

    fn destroy_texture(&mut self, handle: TextureHandle);
}

/// 内存中的上传器：只记录存活的纹理
#[derive(Debug, Default)]
pub struct MemoryUploader {
    next_id: u64,
    live: HashMap<TextureHandle, (u32, u32)>,
    bytes_uploaded: u64,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_textures(&self) -> usize {
        self.live.len()
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }
}

impl TextureUploader for MemoryUploader {
    fn create_texture(&mut self, pixels: &PixelBuffer) -> Result<TextureHandle> {
        self.next_id += 1;
        let handle = TextureHandle(self.next_id);
        self.live.insert(handle, (pixels.width, pixels.height));
        self.bytes_uploaded += pixels.as_bytes().len() as u64;
        Ok(handle)
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        self.live.remove(&handle);
    }
}

/// 待上传的纹理队列，可以从任意线程投递
#[derive(Clone, Default)]
pub struct UploadQueue {
    queue: Arc<SegQueue<(String, PixelBuffer)>>,
}

impl UploadQueue {
    pub fn push(&self, key: &str, pixels: PixelBuffer) {
        self.queue.push((key.to_string(), pixels));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedTexture {
    handle: TextureHandle,
    width: u32,
    height: u32,
}

/// 叠加层纹理缓存，按字符串键索引
pub struct TextureCache<U: TextureUploader> {
    uploader: U,
    textures: HashMap<String, CachedTexture>,
    pending: UploadQueue,
}

impl<U: TextureUploader> TextureCache<U> {
    pub fn new(uploader: U) -> Self {
        Self {
            uploader,
            textures: HashMap::new(),
            pending: UploadQueue::default(),
        }
    }

    /// 上传纹理；同名的旧纹理随之销毁
    pub fn upload(&mut self, key: &str, pixels: PixelBuffer) -> Result<TextureHandle> {
        let handle = self.uploader.create_texture(&pixels)?;
        let entry = CachedTexture {
            handle,
            width: pixels.width,
            height: pixels.height,
        };
        if let Some(old) = self.textures.insert(key.to_string(), entry) {
            debug!("替换纹理 {}: {:?} -> {:?}", key, old.handle, handle);
            self.uploader.destroy_texture(old.handle);
        }
        Ok(handle)
    }

    /// 从图片文件加载纹理
    pub fn load_file<P: AsRef<Path>>(&mut self, key: &str, path: P) -> Result<TextureHandle> {
        let image = image::open(path.as_ref())?.to_rgba8();
        info!(
            "🖼️ 加载纹理 {}: {} ({}x{})",
            key,
            path.as_ref().display(),
            image.width(),
            image.height()
        );
        self.upload(key, PixelBuffer::from_image(&image)?)
    }

    pub fn get(&self, key: &str) -> Option<TextureHandle> {
        self.textures.get(key).map(|t| t.handle)
    }

    pub fn dimensions(&self, key: &str) -> Option<(u32, u32)> {
        self.textures.get(key).map(|t| (t.width, t.height))
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.textures.remove(key) {
            Some(texture) => {
                self.uploader.destroy_texture(texture.handle);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        for (_, texture) in self.textures.drain() {
            self.uploader.destroy_texture(texture.handle);
        }
    }

    /// 跨线程投递上传请求的入口
    pub fn queue(&self) -> UploadQueue {
        self.pending.clone()
    }

    /// 在渲染线程上处理所有排队的上传，返回成功数
    pub fn process_pending(&mut self) -> usize {
        let mut uploaded = 0;
        while let Some((key, pixels)) = self.pending.queue.pop() {
            match self.upload(&key, pixels) {
                Ok(_) => uploaded += 1,
                Err(e) => error!("❌ 纹理 {} 上传失败: {}", key, e),
            }
        }
        uploaded
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }
}

impl<U: TextureUploader> Drop for TextureCache<U> {
    fn drop(&mut self) {
        self.clear();
    }
}
