//! Stack frame layout (spec §4.5.3, grounded on `backend/mir/m_frame_info.h`'s
//! `MFrameInfo`): tracks local variables, spill slots, and the outgoing-argument
//! area, then assigns every object a concrete SP-relative offset in one pass.

use hashbrown::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    LocalVar,
    SpillSlot,
    OutArg,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameObject {
    pub size: u32,
    pub alignment: u32,
    pub offset: Option<i64>,
    pub kind: ObjectKind,
}

fn align_to(v: i64, a: u32) -> i64 {
    let a = a as i64;
    (v + (a - 1)) & !(a - 1)
}

#[derive(Debug, Default)]
pub struct FrameInfo {
    /// Keyed by the IR alloca register the object originated from.
    locals: HashMap<u32, FrameObject>,
    spill_slots: Vec<FrameObject>,
    param_area_size: u32,
    base_align: u32,
}

impl FrameInfo {
    pub fn new() -> Self {
        FrameInfo { base_align: 16, ..Default::default() }
    }

    pub fn create_local(&mut self, ir_reg: u32, size_bytes: u32, alignment: u32) {
        self.locals.insert(ir_reg, FrameObject { size: size_bytes, alignment: alignment.max(16), offset: None, kind: ObjectKind::LocalVar });
    }

    /// Creates a spill slot for the register allocator, returning its index (the
    /// "FI" it will be addressed by in `LSlot`/`SSlot`).
    pub fn create_spill_slot(&mut self, size_bytes: u32, alignment: u32) -> i32 {
        let fi = self.spill_slots.len() as i32;
        self.spill_slots.push(FrameObject { size: size_bytes, alignment: alignment.max(8), offset: None, kind: ObjectKind::SpillSlot });
        fi
    }

    pub fn has_local(&self, ir_reg: u32) -> bool {
        self.locals.contains_key(&ir_reg)
    }

    pub fn set_param_area_size(&mut self, bytes: u32) {
        self.param_area_size = self.param_area_size.max(align_to(bytes as i64, 16) as u32);
    }

    /// Local-variable offset, given a non-negative frame index into the local-var
    /// space (spill slots use negative indices by convention, see `offset_of`).
    pub fn local_offset(&self, ir_reg: u32) -> Option<i64> {
        self.locals.get(&ir_reg).and_then(|o| o.offset)
    }

    pub fn spill_offset(&self, fi: i32) -> Option<i64> {
        self.spill_slots.get(fi as usize).and_then(|o| o.offset)
    }

    /// Lays out param area, then locals, then spill slots, then rounds the whole
    /// frame up to the base alignment (spec §4.5.3 "传参区 -> 局部变量 -> 溢出槽").
    pub fn calculate_offsets(&mut self) -> i64 {
        let mut cur = self.param_area_size as i64;
        // Deterministic order: sort by ir_reg so offset assignment is reproducible.
        let mut keys: Vec<u32> = self.locals.keys().copied().collect();
        keys.sort_unstable();
        for k in keys {
            let obj = self.locals.get_mut(&k).unwrap();
            cur = align_to(cur, obj.alignment);
            obj.offset = Some(cur);
            cur += obj.size as i64;
        }
        for slot in &mut self.spill_slots {
            cur = align_to(cur, slot.alignment);
            slot.offset = Some(cur);
            cur += slot.size as i64;
        }
        align_to(cur, self.base_align)
    }

    pub fn stack_size(&self) -> i64 {
        let mut max_off = self.param_area_size as i64;
        for obj in self.locals.values() {
            if let Some(off) = obj.offset {
                max_off = max_off.max(off + obj.size as i64);
            }
        }
        for slot in &self.spill_slots {
            if let Some(off) = slot.offset {
                max_off = max_off.max(off + slot.size as i64);
            }
        }
        align_to(max_off, self.base_align)
    }
}
