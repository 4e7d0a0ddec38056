use super::*;

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layout: DataLayout::default(),
            values: Vec::new(),
            funcs: Vec::new(),
            globals: Vec::new(),
        }
    }

    fn push_value(&mut self, data: ValueData) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(data);
        id
    }

    /// Integer constant of the given type
    pub fn const_int(&mut self, ty: Ty, value: i64) -> ValueId {
        self.push_value(ValueData {
            kind: ValueKind::Const(value),
            ty,
            name: None,
        })
    }

    /// The null pointer constant of the given pointer type
    pub fn null_ptr(&mut self, ty: Ty) -> ValueId {
        self.push_value(ValueData {
            kind: ValueKind::NullPtr,
            ty,
            name: None,
        })
    }

    pub fn undef(&mut self, ty: Ty) -> ValueId {
        self.push_value(ValueData {
            kind: ValueKind::Undef,
            ty,
            name: None,
        })
    }

    pub fn value(&self, v: ValueId) -> &ValueData {
        &self.values[v.0 as usize]
    }

    pub fn value_mut(&mut self, v: ValueId) -> &mut ValueData {
        &mut self.values[v.0 as usize]
    }

    pub fn value_ty(&self, v: ValueId) -> &Ty {
        &self.values[v.0 as usize].ty
    }

    /// The constant payload of `v`, if it is an integer constant
    pub fn const_value(&self, v: ValueId) -> Option<i64> {
        match self.value(v).kind {
            ValueKind::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_null_const(&self, v: ValueId) -> bool {
        matches!(self.value(v).kind, ValueKind::NullPtr)
    }

    /// Whether `v` is a constant in the IR sense (literals, null,
    /// undef, globals, and function addresses)
    pub fn is_constant(&self, v: ValueId) -> bool {
        matches!(
            self.value(v).kind,
            ValueKind::Const(_)
                | ValueKind::NullPtr
                | ValueKind::Undef
                | ValueKind::Global(_)
                | ValueKind::Function(_)
        )
    }

    /// Human-readable handle for diagnostics, e.g. `buf[v12]`
    pub fn value_name(&self, v: ValueId) -> String {
        match &self.value(v).name {
            Some(n) => format!("{}[{}]", n, v),
            None => v.to_string(),
        }
    }

    /// Define a function with a body (an empty entry block is created)
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        params: &[(Option<&str>, Ty)],
        ret: Ty,
        var_arg: bool,
        linkage: Linkage,
    ) -> FuncId {
        let id = self.new_function(
            name,
            params,
            ret,
            var_arg,
            linkage,
            false,
        );
        self.funcs[id.0 as usize].blocks.push(Block {
            id: BlockId(0),
            name: Some("entry".into()),
            insts: Vec::new(),
            term: None,
        });
        id
    }

    /// Declare a function with no body
    pub fn declare_function(
        &mut self,
        name: impl Into<String>,
        param_tys: &[Ty],
        ret: Ty,
        var_arg: bool,
    ) -> FuncId {
        let params: Vec<(Option<&str>, Ty)> =
            param_tys.iter().map(|t| (None, t.clone())).collect();
        self.new_function(name, &params, ret, var_arg, Linkage::External, true)
    }

    fn new_function(
        &mut self,
        name: impl Into<String>,
        params: &[(Option<&str>, Ty)],
        ret: Ty,
        var_arg: bool,
        linkage: Linkage,
        is_declaration: bool,
    ) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        let name = name.into();
        let ty = Ty::Func {
            params: params.iter().map(|(_, t)| t.clone()).collect(),
            ret: Box::new(ret),
            var_arg,
        };
        let value = self.push_value(ValueData {
            kind: ValueKind::Function(id),
            ty: Ty::ptr_to(ty.clone()),
            name: Some(name.clone()),
        });
        let param_values: Vec<ValueId> = params
            .iter()
            .enumerate()
            .map(|(i, (pname, pty))| {
                self.push_value(ValueData {
                    kind: ValueKind::Param {
                        func: id,
                        index: i as u32,
                    },
                    ty: pty.clone(),
                    name: pname.map(|s| s.to_string()),
                })
            })
            .collect();
        self.funcs.push(Function {
            name,
            ty,
            value,
            params: param_values,
            blocks: Vec::new(),
            insts: Vec::new(),
            entry: BlockId(0),
            linkage,
            is_declaration,
            deleted: false,
        });
        id
    }

    pub fn func(&self, f: FuncId) -> &Function {
        &self.funcs[f.0 as usize]
    }

    pub fn func_mut(&mut self, f: FuncId) -> &mut Function {
        &mut self.funcs[f.0 as usize]
    }

    /// Look a function up by name, skipping tombstones
    pub fn get_function(&self, name: &str) -> Option<FuncId> {
        self.funcs
            .iter()
            .position(|f| !f.deleted && f.name == name)
            .map(|i| FuncId(i as u32))
    }

    pub fn get_or_declare_function(
        &mut self,
        name: &str,
        param_tys: &[Ty],
        ret: Ty,
    ) -> FuncId {
        match self.get_function(name) {
            Some(f) => f,
            None => self.declare_function(name, param_tys, ret, false),
        }
    }

    /// Ids of all live (non-tombstoned) functions, in definition order
    pub fn func_ids(&self) -> Vec<FuncId> {
        self.funcs
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.deleted)
            .map(|(i, _)| FuncId(i as u32))
            .collect()
    }

    pub fn add_global(&mut self, name: impl Into<String>, ty: Ty) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        let name = name.into();
        let value = self.push_value(ValueData {
            kind: ValueKind::Global(id),
            ty: Ty::ptr_to(ty.clone()),
            name: Some(name.clone()),
        });
        self.globals.push(Global { name, ty, value });
        id
    }

    pub fn global(&self, g: GlobalId) -> &Global {
        &self.globals[g.0 as usize]
    }

    /// The instruction defining `v`, if `v` is an instruction result
    pub fn def_inst(&self, v: ValueId) -> Option<(FuncId, InstId)> {
        match self.value(v).kind {
            ValueKind::Inst { func, inst } => Some((func, inst)),
            _ => None,
        }
    }

    /// Replace every operand use of `old` with `new` across the module
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        for func in &mut self.funcs {
            if func.deleted {
                continue;
            }
            for inst in &mut func.insts {
                if inst.detached {
                    continue;
                }
                inst.kind.visit_operands_mut(|op| {
                    if *op == old {
                        *op = new;
                    }
                });
            }
        }
    }

    /// Number of operand uses of `v` across all live instructions
    pub fn count_uses(&self, v: ValueId) -> usize {
        let mut count = 0;
        for func in &self.funcs {
            if func.deleted {
                continue;
            }
            for inst in &func.insts {
                if inst.detached {
                    continue;
                }
                count += inst.kind.operands().iter().filter(|&&op| op == v).count();
            }
        }
        count
    }

    /// Uses of a function: direct calls naming it plus operand uses of
    /// its address value
    pub fn count_function_uses(&self, f: FuncId) -> usize {
        let addr = self.func(f).value;
        let mut count = self.count_uses(addr);
        for func in &self.funcs {
            if func.deleted {
                continue;
            }
            for inst in &func.insts {
                if inst.detached {
                    continue;
                }
                if let InstKind::Call {
                    callee: Callee::Direct(callee),
                    ..
                } = &inst.kind
                {
                    if *callee == f {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    /// Re-home instruction result values after a body moves from one
    /// function to another (signature rewriting splices bodies whole)
    pub fn reparent_insts(&mut self, from: FuncId, to: FuncId) {
        for value in &mut self.values {
            if let ValueKind::Inst { func, .. } = &mut value.kind {
                if *func == from {
                    *func = to;
                }
            }
        }
    }

    /// Tombstone a function, keeping ids stable
    pub fn erase_function(&mut self, f: FuncId) {
        let func = &mut self.funcs[f.0 as usize];
        func.deleted = true;
        func.blocks.clear();
        func.insts.clear();
    }

    /// The element type a GEP's result points at
    pub fn gep_result_elem_ty(&self, base_ty: &Ty, indices: &[ValueId]) -> Ty {
        let mut cur = base_ty
            .pointee()
            .unwrap_or_else(|| panic!("GEP base is not a pointer: {}", base_ty))
            .clone();
        for &idx in indices.iter().skip(1) {
            cur = match cur {
                Ty::Array { elem, .. } => *elem,
                Ty::Struct { fields } => {
                    let i = self
                        .const_value(idx)
                        .expect("struct GEP index must be constant");
                    fields[i as usize].clone()
                }
                other => panic!("cannot index into {}", other),
            };
        }
        cur
    }

    /// Result type of a GEP: pointer to the final element type
    pub fn gep_result_ty(&self, base_ty: &Ty, indices: &[ValueId]) -> Ty {
        Ty::ptr_to(self.gep_result_elem_ty(base_ty, indices))
    }

    pub fn has_all_zero_indices(&self, indices: &[ValueId]) -> bool {
        indices.iter().all(|&i| self.const_value(i) == Some(0))
    }

    /// Byte offset of a GEP whose indices are all constant
    pub fn accumulate_constant_offset(
        &self,
        base_ty: &Ty,
        indices: &[ValueId],
    ) -> Option<i64> {
        let mut offset: i64 = 0;
        let mut cur = base_ty.pointee()?.clone();
        let first = self.const_value(*indices.first()?)?;
        offset += first * self.layout.alloc_size(&cur) as i64;
        for &idx in indices.iter().skip(1) {
            let i = self.const_value(idx)?;
            cur = match cur {
                Ty::Array { elem, .. } => {
                    offset += i * self.layout.alloc_size(&elem) as i64;
                    *elem
                }
                Ty::Struct { fields } => {
                    for field in &fields[..i as usize] {
                        offset += self.layout.alloc_size(field) as i64;
                    }
                    fields[i as usize].clone()
                }
                _ => return None,
            };
        }
        Some(offset)
    }
}

impl Function {
    pub fn ret_ty(&self) -> &Ty {
        match &self.ty {
            Ty::Func { ret, .. } => ret,
            _ => unreachable!("function type is not Func"),
        }
    }

    pub fn param_tys(&self) -> &[Ty] {
        match &self.ty {
            Ty::Func { params, .. } => params,
            _ => unreachable!("function type is not Func"),
        }
    }

    pub fn is_var_arg(&self) -> bool {
        match &self.ty {
            Ty::Func { var_arg, .. } => *var_arg,
            _ => unreachable!("function type is not Func"),
        }
    }

    pub fn add_block(&mut self, name: Option<&str>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            name: name.map(|s| s.to_string()),
            insts: Vec::new(),
            term: None,
        });
        id
    }

    pub fn block(&self, b: BlockId) -> &Block {
        &self.blocks[b.0 as usize]
    }

    pub fn block_mut(&mut self, b: BlockId) -> &mut Block {
        &mut self.blocks[b.0 as usize]
    }

    pub fn inst(&self, i: InstId) -> &InstData {
        &self.insts[i.0 as usize]
    }

    pub fn inst_mut(&mut self, i: InstId) -> &mut InstData {
        &mut self.insts[i.0 as usize]
    }

    /// Unlink an instruction from its block. The arena slot stays
    /// behind, marked detached.
    pub fn detach_inst(&mut self, i: InstId) {
        let block = self.insts[i.0 as usize].block;
        let b = &mut self.blocks[block.0 as usize];
        b.insts.retain(|&x| x != i);
        if b.term == Some(i) {
            b.term = None;
        }
        self.insts[i.0 as usize].detached = true;
    }

    /// Split `block` right before `at`: `at`, everything after it, and
    /// the terminator move to a fresh block. The original block is left
    /// without a terminator.
    pub fn split_block(&mut self, block: BlockId, at: InstId) -> BlockId {
        let new_id = BlockId(self.blocks.len() as u32);
        let old = &mut self.blocks[block.0 as usize];
        let pos = old
            .insts
            .iter()
            .position(|&i| i == at)
            .expect("split point is not in the block");
        let moved: Vec<InstId> = old.insts.split_off(pos);
        let term = old.term.take();
        for &i in &moved {
            self.insts[i.0 as usize].block = new_id;
        }
        if let Some(t) = term {
            self.insts[t.0 as usize].block = new_id;
        }
        self.blocks.push(Block {
            id: new_id,
            name: None,
            insts: moved,
            term,
        });
        new_id
    }

    /// Every instruction in program order (block order, terminators
    /// included). The walker iterates over this snapshot because it
    /// inserts instructions and splits blocks as it goes.
    pub fn snapshot_insts(&self) -> Vec<InstId> {
        let mut out = Vec::new();
        for block in &self.blocks {
            out.extend(block.insts.iter().copied());
            if let Some(t) = block.term {
                out.push(t);
            }
        }
        out
    }
}

impl Block {
    /// Successor block ids from the terminator
    pub fn successors(&self, func: &Function) -> Vec<BlockId> {
        match self.term {
            Some(t) => match &func.inst(t).kind {
                InstKind::Br { dest } => vec![*dest],
                InstKind::CondBr {
                    then_dest,
                    else_dest,
                    ..
                } => vec![*then_dest, *else_dest],
                InstKind::Ret { .. } | InstKind::Unreachable => vec![],
                other => panic!("invalid terminator: {:?}", other),
            },
            None => vec![],
        }
    }
}
