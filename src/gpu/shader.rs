use std::sync::Arc;

use bitflags::bitflags;

use super::error::{GPUError, Result};
use crate::utils::{content_hash, Handle, Pool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

bitflags! {
    /// Stages a binding is visible to.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct ShaderStages: u8 {
        const VERTEX  = 0x1;
        const PIXEL   = 0x2;
        const COMPUTE = 0x4;
    }
}

impl From<ShaderStage> for ShaderStages {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => ShaderStages::VERTEX,
            ShaderStage::Pixel => ShaderStages::PIXEL,
            ShaderStage::Compute => ShaderStages::COMPUTE,
        }
    }
}

/// What a reflected input binds. Declaration order is the order inputs
/// of the same update frequency are laid out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingKind {
    Texture,
    Buffer,
    RwTexture,
    RwBuffer,
    ConstantBuffer,
    Sampler,
}

/// Descriptor type a [`BindingKind`] occupies in a table range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RangeKind {
    ShaderResource,
    UnorderedAccess,
    ConstantBuffer,
    Sampler,
}

impl BindingKind {
    /// Lower binds more often: views, then constant buffers, then samplers.
    pub fn frequency(self) -> u8 {
        match self {
            BindingKind::Texture | BindingKind::Buffer => 0,
            BindingKind::RwTexture | BindingKind::RwBuffer => 0,
            BindingKind::ConstantBuffer => 1,
            BindingKind::Sampler => 2,
        }
    }

    pub fn range_kind(self) -> RangeKind {
        match self {
            BindingKind::Texture | BindingKind::Buffer => RangeKind::ShaderResource,
            BindingKind::RwTexture | BindingKind::RwBuffer => RangeKind::UnorderedAccess,
            BindingKind::ConstantBuffer => RangeKind::ConstantBuffer,
            BindingKind::Sampler => RangeKind::Sampler,
        }
    }

    pub fn is_sampler(self) -> bool {
        self == BindingKind::Sampler
    }
}

/// One named input as reflected from a single shader stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderInput {
    pub name: String,
    pub kind: BindingKind,
    pub register: u32,
    pub space: u32,
    /// Array length; 1 for scalars.
    pub count: u32,
    /// Hash of the declared type (dimension, element type, struct layout).
    pub shape_hash: u64,
}

impl ShaderInput {
    pub fn new(name: impl Into<String>, kind: BindingKind, register: u32, space: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            register,
            space,
            count: 1,
            shape_hash: content_hash(&(kind, 1u32)),
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self.shape_hash = content_hash(&(self.kind, count));
        self
    }

    pub fn with_shape(mut self, shape_hash: u64) -> Self {
        self.shape_hash = shape_hash;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstantVariable {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstantBufferDesc {
    pub name: String,
    pub register: u32,
    pub space: u32,
    pub size: u32,
    pub variables: Vec<ConstantVariable>,
}

impl ConstantBufferDesc {
    /// Identity of the buffer's layout, independent of where it is bound.
    pub fn layout_hash(&self) -> u64 {
        content_hash(&(&self.name, self.size, &self.variables))
    }
}

/// Everything binding-related recovered from one shader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ShaderReflection {
    pub inputs: Vec<ShaderInput>,
    pub constant_buffers: Vec<ConstantBufferDesc>,
}

impl ShaderReflection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, input: ShaderInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn texture(self, name: &str, register: u32) -> Self {
        self.input(ShaderInput::new(name, BindingKind::Texture, register, 0))
    }

    pub fn rw_texture(self, name: &str, register: u32) -> Self {
        self.input(ShaderInput::new(name, BindingKind::RwTexture, register, 0))
    }

    pub fn buffer(self, name: &str, register: u32) -> Self {
        self.input(ShaderInput::new(name, BindingKind::Buffer, register, 0))
    }

    pub fn rw_buffer(self, name: &str, register: u32) -> Self {
        self.input(ShaderInput::new(name, BindingKind::RwBuffer, register, 0))
    }

    pub fn sampler(self, name: &str, register: u32) -> Self {
        self.input(ShaderInput::new(name, BindingKind::Sampler, register, 0))
    }

    /// Declares a constant buffer and the input that binds it.
    pub fn constant_buffer(mut self, desc: ConstantBufferDesc) -> Self {
        let input = ShaderInput::new(&desc.name, BindingKind::ConstantBuffer, desc.register, desc.space)
            .with_shape(desc.layout_hash());
        self.inputs.push(input);
        self.constant_buffers.push(desc);
        self
    }
}

pub struct Shader {
    pub stage: ShaderStage,
    pub debug_name: String,
    pub bytecode: Arc<[u8]>,
    pub hash: u64,
    pub reflection: Arc<ShaderReflection>,
}

pub type ShaderHandle = Handle<Shader>;

/// Bytecode as handed to pipeline creation.
#[derive(Clone)]
pub struct ShaderBytecode {
    pub bytes: Arc<[u8]>,
    pub hash: u64,
}

/// Owns every shader's current bytecode and reflection.
#[derive(Default)]
pub struct ShaderLibrary {
    shaders: Pool<Shader>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        stage: ShaderStage,
        debug_name: &str,
        bytecode: &[u8],
        reflection: ShaderReflection,
    ) -> ShaderHandle {
        self.shaders.insert(Shader {
            stage,
            debug_name: debug_name.to_string(),
            bytecode: Arc::from(bytecode),
            hash: content_hash(bytecode),
            reflection: Arc::new(reflection),
        })
    }

    pub fn get(&self, handle: ShaderHandle) -> Result<&Shader> {
        self.shaders.get_ref(handle).ok_or(GPUError::UnknownShader)
    }

    pub fn bytecode(&self, handle: ShaderHandle) -> Result<ShaderBytecode> {
        let shader = self.get(handle)?;
        Ok(ShaderBytecode {
            bytes: Arc::clone(&shader.bytecode),
            hash: shader.hash,
        })
    }

    pub fn reflection(&self, handle: ShaderHandle) -> Result<Arc<ShaderReflection>> {
        Ok(Arc::clone(&self.get(handle)?.reflection))
    }

    /// Swaps in freshly compiled bytecode. Returns whether the binary
    /// actually changed.
    pub fn reload(
        &mut self,
        handle: ShaderHandle,
        bytecode: &[u8],
        reflection: ShaderReflection,
    ) -> Result<bool> {
        let shader = self
            .shaders
            .get_mut_ref(handle)
            .ok_or(GPUError::UnknownShader)?;
        let hash = content_hash(bytecode);
        if hash == shader.hash && *shader.reflection == reflection {
            return Ok(false);
        }
        shader.bytecode = Arc::from(bytecode);
        shader.hash = hash;
        shader.reflection = Arc::new(reflection);
        Ok(true)
    }

    pub fn destroy(&mut self, handle: ShaderHandle) -> Result<()> {
        self.shaders
            .release(handle)
            .map(|_| ())
            .ok_or(GPUError::UnknownShader)
    }
}
