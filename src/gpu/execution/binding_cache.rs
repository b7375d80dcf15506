use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::gpu::error::{GPUError, Result};
use crate::gpu::shader::{
    BindingKind, ConstantBufferDesc, RangeKind, ShaderHandle, ShaderInput, ShaderLibrary,
    ShaderReflection, ShaderStage, ShaderStages,
};
use crate::gpu::stats::StatsCounters;
use crate::gpu::Backend;
use crate::utils::content_hash;

// ----- Keys used by the caches ------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayoutKey(pub u64);

type ShaderSet = SmallVec<[ShaderHandle; 2]>;

// ----- Layout description -------------------------------------------------------

/// Run of same-kind descriptors at adjacent registers in one space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingRange {
    pub kind: RangeKind,
    pub base_register: u32,
    pub space: u32,
    pub count: u32,
    /// First descriptor of the range within its table.
    pub offset: u32,
}

/// Descriptors updated together. Tables are ordered from most to least
/// frequently rebound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingTable {
    pub frequency: u8,
    pub sampler: bool,
    pub visibility: ShaderStages,
    pub ranges: SmallVec<[BindingRange; 4]>,
    /// Descriptors in the table.
    pub size: u32,
}

/// Where a named input lives in the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSlot {
    pub table: u32,
    pub offset: u32,
    pub count: u32,
    pub kind: BindingKind,
    pub stages: ShaderStages,
}

/// A constant variable, addressed by the layout of the buffer holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantLocation {
    pub buffer: u64,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantBufferBinding {
    pub name: String,
    /// [`ConstantBufferDesc::layout_hash`] of the buffer.
    pub hash: u64,
    pub size: u32,
    pub slot: BindingSlot,
}

/// Binding layout of one set of shaders.
pub struct Bindings<B: Backend> {
    /// Hash of the merged input set.
    pub hash: u64,
    /// Hash of `tables`; equal for structurally identical layouts.
    pub layout_hash: u64,
    pub tables: Vec<BindingTable>,
    pub layout: Arc<B::BindLayout>,
    slots: FxHashMap<String, BindingSlot>,
    constants: FxHashMap<String, ConstantLocation>,
    constant_buffers: Vec<ConstantBufferBinding>,
}

impl<B: Backend> Bindings<B> {
    pub fn slot(&self, name: &str) -> Option<BindingSlot> {
        self.slots.get(name).copied()
    }

    pub fn slots(&self) -> impl Iterator<Item = (&str, BindingSlot)> {
        self.slots.iter().map(|(name, slot)| (name.as_str(), *slot))
    }

    pub fn constant(&self, name: &str) -> Option<ConstantLocation> {
        self.constants.get(name).copied()
    }

    pub fn constant_buffers(&self) -> &[ConstantBufferBinding] {
        &self.constant_buffers
    }
}

// ----- Reflection merge ---------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MergedInput {
    input: ShaderInput,
    stages: ShaderStages,
}

/// Tables and name lookups computed from reflection, before any native
/// object exists.
#[derive(Debug, Clone)]
pub struct LayoutPlan {
    pub hash: u64,
    pub layout_hash: u64,
    pub tables: Vec<BindingTable>,
    slots: FxHashMap<String, BindingSlot>,
    constants: FxHashMap<String, ConstantLocation>,
    constant_buffers: Vec<ConstantBufferBinding>,
}

impl LayoutPlan {
    pub fn from_reflections(reflections: &[(ShaderStage, &ShaderReflection)]) -> Result<Self> {
        let (mut inputs, buffers) = merge_inputs(reflections)?;
        inputs.sort_by(|a, b| {
            let ka = (a.input.kind.frequency(), a.input.kind.range_kind(), a.input.register, a.input.space);
            let kb = (b.input.kind.frequency(), b.input.kind.range_kind(), b.input.register, b.input.space);
            ka.cmp(&kb).then_with(|| a.input.name.cmp(&b.input.name))
        });
        let hash = content_hash(&(&inputs, &buffers));

        let mut tables: Vec<BindingTable> = Vec::new();
        let mut slots = FxHashMap::default();
        for merged in &inputs {
            let input = &merged.input;
            let frequency = input.kind.frequency();
            let sampler = input.kind.is_sampler();
            let starts_table = tables
                .last()
                .map_or(true, |t| t.frequency != frequency || t.sampler != sampler);
            if starts_table {
                tables.push(BindingTable {
                    frequency,
                    sampler,
                    visibility: ShaderStages::empty(),
                    ranges: SmallVec::new(),
                    size: 0,
                });
            }
            let table_index = tables.len() as u32 - 1;
            let Some(table) = tables.last_mut() else {
                unreachable!("a table was pushed above");
            };

            let kind = input.kind.range_kind();
            let offset = table.size;
            match table.ranges.last_mut() {
                Some(range)
                    if range.kind == kind
                        && range.space == input.space
                        && range.base_register + range.count == input.register =>
                {
                    range.count += input.count;
                }
                _ => table.ranges.push(BindingRange {
                    kind,
                    base_register: input.register,
                    space: input.space,
                    count: input.count,
                    offset,
                }),
            }
            table.size += input.count;
            table.visibility |= merged.stages;

            slots.insert(
                input.name.clone(),
                BindingSlot {
                    table: table_index,
                    offset,
                    count: input.count,
                    kind: input.kind,
                    stages: merged.stages,
                },
            );
        }

        let mut constants = FxHashMap::default();
        let mut constant_buffers = Vec::with_capacity(buffers.len());
        for buffer in &buffers {
            let buffer_hash = buffer.layout_hash();
            for var in &buffer.variables {
                let location = ConstantLocation {
                    buffer: buffer_hash,
                    offset: var.offset,
                    size: var.size,
                };
                if constants.insert(var.name.clone(), location).is_some() {
                    return Err(GPUError::AmbiguousBinding {
                        name: var.name.clone(),
                    });
                }
            }
            if let Some(slot) = slots.get(&buffer.name) {
                constant_buffers.push(ConstantBufferBinding {
                    name: buffer.name.clone(),
                    hash: buffer_hash,
                    size: buffer.size,
                    slot: *slot,
                });
            }
        }

        let layout_hash = content_hash(&tables);
        Ok(Self {
            hash,
            layout_hash,
            tables,
            slots,
            constants,
            constant_buffers,
        })
    }
}

fn merge_inputs(
    reflections: &[(ShaderStage, &ShaderReflection)],
) -> Result<(Vec<MergedInput>, Vec<ConstantBufferDesc>)> {
    let mut merged: Vec<MergedInput> = Vec::new();
    let mut by_name: FxHashMap<&str, usize> = FxHashMap::default();
    let mut by_register: FxHashMap<(RangeKind, u32, u32), usize> = FxHashMap::default();

    for (stage, reflection) in reflections {
        for input in &reflection.inputs {
            if let Some(&index) = by_name.get(input.name.as_str()) {
                let existing = &mut merged[index];
                if existing.input != *input {
                    return Err(GPUError::AmbiguousBinding {
                        name: input.name.clone(),
                    });
                }
                existing.stages |= ShaderStages::from(*stage);
                continue;
            }

            let register_key = (input.kind.range_kind(), input.register, input.space);
            if by_register.contains_key(&register_key) {
                return Err(GPUError::AmbiguousBinding {
                    name: input.name.clone(),
                });
            }
            by_register.insert(register_key, merged.len());
            by_name.insert(input.name.as_str(), merged.len());
            merged.push(MergedInput {
                input: input.clone(),
                stages: ShaderStages::from(*stage),
            });
        }
    }

    let mut buffers: Vec<ConstantBufferDesc> = Vec::new();
    for (_, reflection) in reflections {
        for buffer in &reflection.constant_buffers {
            if !buffers.iter().any(|b| b.name == buffer.name) {
                buffers.push(buffer.clone());
            }
        }
    }
    buffers.sort_by(|a, b| (a.space, a.register).cmp(&(b.space, b.register)));
    Ok((merged, buffers))
}

// ----- BindingCache -------------------------------------------------------------

struct CacheState<B: Backend> {
    by_shaders: FxHashMap<ShaderSet, Arc<Bindings<B>>>,
    by_inputs: FxHashMap<LayoutKey, Arc<Bindings<B>>>,
    layouts: FxHashMap<LayoutKey, Arc<B::BindLayout>>,
}

/// Shader set to binding layout cache.
///
/// Lookups take the read lock; a miss merges reflection outside the lock
/// and re-checks under the write lock before building anything.
pub struct BindingCache<B: Backend> {
    state: RwLock<CacheState<B>>,
}

impl<B: Backend> Default for BindingCache<B> {
    fn default() -> Self {
        Self {
            state: RwLock::new(CacheState {
                by_shaders: FxHashMap::default(),
                by_inputs: FxHashMap::default(),
                layouts: FxHashMap::default(),
            }),
        }
    }
}

impl<B: Backend> BindingCache<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_bindings(
        &self,
        backend: &B,
        library: &ShaderLibrary,
        shaders: &[ShaderHandle],
        stats: &StatsCounters,
    ) -> Result<Arc<Bindings<B>>> {
        let key: ShaderSet = shaders.iter().copied().collect();
        if let Some(bindings) = self.state.read().by_shaders.get(&key) {
            return Ok(Arc::clone(bindings));
        }

        let mut reflections = Vec::with_capacity(shaders.len());
        for handle in shaders {
            let shader = library.get(*handle)?;
            reflections.push((shader.stage, Arc::clone(&shader.reflection)));
        }
        let borrowed: Vec<_> = reflections.iter().map(|(s, r)| (*s, r.as_ref())).collect();
        let plan = LayoutPlan::from_reflections(&borrowed)?;

        let mut state = self.state.write();
        if let Some(bindings) = state.by_shaders.get(&key) {
            return Ok(Arc::clone(bindings));
        }
        if let Some(bindings) = state.by_inputs.get(&LayoutKey(plan.hash)).cloned() {
            state.by_shaders.insert(key, Arc::clone(&bindings));
            return Ok(bindings);
        }

        let shape_key = LayoutKey(plan.layout_hash);
        let layout = match state.layouts.get(&shape_key) {
            Some(layout) => Arc::clone(layout),
            None => {
                let layout = Arc::new(backend.create_bind_layout(&plan.tables)?);
                stats.bind_layout_built();
                log::debug!(
                    "built bind layout {:016x} with {} tables",
                    plan.layout_hash,
                    plan.tables.len()
                );
                state.layouts.insert(shape_key, Arc::clone(&layout));
                layout
            }
        };

        let bindings = Arc::new(Bindings {
            hash: plan.hash,
            layout_hash: plan.layout_hash,
            tables: plan.tables,
            layout,
            slots: plan.slots,
            constants: plan.constants,
            constant_buffers: plan.constant_buffers,
        });
        state.by_inputs.insert(LayoutKey(plan.hash), Arc::clone(&bindings));
        state.by_shaders.insert(key, Arc::clone(&bindings));
        Ok(bindings)
    }

    /// Drops every shader-set entry that includes `shader`. Returns how many
    /// were removed.
    pub fn invalidate_shader(&self, shader: ShaderHandle) -> usize {
        let mut state = self.state.write();
        let before = state.by_shaders.len();
        state.by_shaders.retain(|set, _| !set.contains(&shader));
        before - state.by_shaders.len()
    }

    pub fn bind_layout_count(&self) -> usize {
        self.state.read().layouts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::shader::ConstantVariable;

    fn camera() -> ConstantBufferDesc {
        ConstantBufferDesc {
            name: "Camera".into(),
            register: 0,
            space: 0,
            size: 80,
            variables: vec![
                ConstantVariable {
                    name: "view_proj".into(),
                    offset: 0,
                    size: 64,
                },
                ConstantVariable {
                    name: "tint".into(),
                    offset: 64,
                    size: 16,
                },
            ],
        }
    }

    #[test]
    fn constant_name_in_two_buffers_is_ambiguous() {
        let material = ConstantBufferDesc {
            name: "Material".into(),
            register: 1,
            space: 0,
            size: 16,
            variables: vec![ConstantVariable {
                name: "tint".into(),
                offset: 0,
                size: 16,
            }],
        };
        let vs = ShaderReflection::new().constant_buffer(camera());
        let ps = ShaderReflection::new().constant_buffer(material);
        let plan =
            LayoutPlan::from_reflections(&[(ShaderStage::Vertex, &vs), (ShaderStage::Pixel, &ps)]);
        assert!(matches!(plan, Err(GPUError::AmbiguousBinding { name }) if name == "tint"));

        // The same buffer seen from two stages is not a collision.
        let shared = ShaderReflection::new().constant_buffer(camera());
        let plan =
            LayoutPlan::from_reflections(&[(ShaderStage::Vertex, &vs), (ShaderStage::Pixel, &shared)])
                .unwrap();
        assert!(plan.constants.contains_key("tint"));
    }

    #[test]
    fn inputs_group_by_frequency_and_adjacent_registers() {
        let vs = ShaderReflection::new().constant_buffer(camera()).buffer("instances", 3);
        let ps = ShaderReflection::new()
            .texture("albedo", 0)
            .texture("normal", 1)
            .rw_texture("feedback", 0)
            .sampler("linear", 0)
            .constant_buffer(camera());
        let plan =
            LayoutPlan::from_reflections(&[(ShaderStage::Vertex, &vs), (ShaderStage::Pixel, &ps)])
                .unwrap();

        assert_eq!(plan.tables.len(), 3);
        let views = &plan.tables[0];
        assert_eq!(views.frequency, 0);
        assert_eq!(views.size, 4);
        let ranges: Vec<_> = views.ranges.iter().map(|r| (r.kind, r.base_register, r.count)).collect();
        assert_eq!(
            ranges,
            vec![
                (RangeKind::ShaderResource, 0, 2),
                (RangeKind::ShaderResource, 3, 1),
                (RangeKind::UnorderedAccess, 0, 1),
            ]
        );
        assert_eq!(plan.tables[1].frequency, 1);
        assert!(plan.tables[2].sampler);

        let camera_slot = plan.slots["Camera"];
        assert_eq!(camera_slot.stages, ShaderStages::VERTEX | ShaderStages::PIXEL);
        assert_eq!(plan.constants["tint"].offset, 64);
        assert_eq!(plan.constants["tint"].buffer, camera().layout_hash());
        assert_eq!(plan.constant_buffers.len(), 1);
    }

    #[test]
    fn same_name_different_shape_is_ambiguous() {
        let vs = ShaderReflection::new().texture("albedo", 0);
        let ps = ShaderReflection::new().texture("albedo", 1);
        let err =
            LayoutPlan::from_reflections(&[(ShaderStage::Vertex, &vs), (ShaderStage::Pixel, &ps)])
                .unwrap_err();
        assert!(matches!(err, GPUError::AmbiguousBinding { name } if name == "albedo"));
    }

    #[test]
    fn identical_inputs_produce_identical_plans() {
        let a = ShaderReflection::new().texture("albedo", 0).sampler("s", 0);
        let b = ShaderReflection::new().sampler("s", 0).texture("albedo", 0);
        let pa = LayoutPlan::from_reflections(&[(ShaderStage::Pixel, &a)]).unwrap();
        let pb = LayoutPlan::from_reflections(&[(ShaderStage::Pixel, &b)]).unwrap();
        assert_eq!(pa.hash, pb.hash);
        assert_eq!(pa.tables, pb.tables);
    }
}
