//! Domain bridge: set registry, statement macros, and loop-nest requests.
//!
//! The bridge is the boundary between the graph world and loop-nest
//! synthesis. Domains are registered by set text or [`Space`]; requests name
//! registered sets and attach statements, guards, schedules, and data
//! mappings. A request naming an unknown set yields an in-band sentinel
//! string rather than an error, mirroring the behavior of external
//! polyhedral scanners; callers that persist output must check for it.

pub mod nestgen;

use linked_hash_map::LinkedHashMap;
use std::collections::BTreeMap;

use crate::algebra::{parse_set, Constr, Expr};
use crate::model::{Comp, Sched, SchedDim, Space};
use crate::utils::errors::FlowResult;

pub use nestgen::{generate, max_iter_depth, NestStmt, UfTable};

/// A registered set: name, iterator tuple, constraints.
#[derive(Debug, Clone)]
pub struct SetDesc {
    pub name: String,
    pub iters: Vec<String>,
    pub constraints: Vec<Constr>,
}

impl SetDesc {
    fn to_text(&self) -> String {
        let cs: Vec<String> = self.constraints.iter().map(|c| c.to_string()).collect();
        if cs.is_empty() {
            format!("{} := {{[{}]}}", self.name, self.iters.join(","))
        } else {
            format!("{} := {{[{}] : {}}}", self.name, self.iters.join(","), cs.join(" && "))
        }
    }
}

impl From<&Space> for SetDesc {
    fn from(space: &Space) -> Self {
        Self {
            name: space.name.clone(),
            iters: space.iterators(),
            constraints: space.constraints().to_vec(),
        }
    }
}

/// One statement of a loop-nest request.
#[derive(Debug, Clone)]
pub struct StmtSpec {
    /// Registered set this statement iterates over
    pub set: String,
    /// Scheduling function placing the statement
    pub sched: Sched,
    /// Statement text, original iterator names
    pub stmt: String,
    /// Guard condition folded into the statement macro
    pub guard: Option<String>,
    /// Access-text to linearized-text substitutions
    pub mappings: Vec<(String, String)>,
}

/// A loop-nest request: statements plus emission options.
#[derive(Debug, Clone, Default)]
pub struct NestRequest {
    pub stmts: Vec<StmtSpec>,
    /// OpenMP schedule; empty disables the pragma, `simd` selects the simd
    /// pragma instead of parallel-for
    pub omp: String,
    /// Induction-variable declaration type; empty suppresses the
    /// declaration line (the routine header declares them instead)
    pub decl_type: String,
    /// Prepend the uninterpreted-function macro block
    pub with_macros: bool,
}

fn sentinel(name: &str) -> String {
    format!("ERROR: Set '{}' does not exist in 'codegen'.", name)
}

/// Whether generated text is the unknown-set sentinel.
pub fn is_sentinel(code: &str) -> bool {
    code.starts_with("ERROR:")
}

/// The bridge facade: set registry plus accumulated macro vocabulary.
#[derive(Debug, Clone, Default)]
pub struct PolyBridge {
    sets: LinkedHashMap<String, SetDesc>,
    macros: BTreeMap<String, String>,
}

impl PolyBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a set from text; returns the normalized text.
    pub fn add(&mut self, text: &str) -> FlowResult<String> {
        let parsed = parse_set(text)?;
        let desc = SetDesc {
            name: parsed.name.unwrap_or_else(|| "I".to_string()),
            iters: parsed.iters,
            constraints: parsed.constraints,
        };
        let normalized = desc.to_text();
        self.sets.insert(desc.name.clone(), desc);
        Ok(normalized)
    }

    /// Register a space directly; returns the normalized set text.
    pub fn add_space(&mut self, space: &Space) -> String {
        let desc = SetDesc::from(space);
        let normalized = desc.to_text();
        self.sets.insert(desc.name.clone(), desc);
        normalized
    }

    pub fn get(&self, name: &str) -> Option<&SetDesc> {
        self.sets.get(name)
    }

    /// Accumulated uninterpreted-function macros from every request, sorted
    /// by macro name. The program assembler merges these into its header.
    pub fn macros(&self) -> &BTreeMap<String, String> {
        &self.macros
    }

    /// Bare loop nest for a registered set with its identity schedule, or
    /// the sentinel if the set is unknown.
    pub fn codegen(&mut self, name: &str) -> String {
        let Some(set) = self.sets.get(name) else {
            return sentinel(name);
        };
        let sched = Sched::identity(format!("r0{}", name), set.iters.clone(), 0);
        let mut ufs = UfTable::new();
        ufs.register_constraints(&set.iters, &set.constraints);
        let stmt = NestStmt::new(0, set.iters.clone(), &sched, set.constraints.clone());
        for (lhs, rhs) in ufs.macros() {
            self.macros.insert(lhs, rhs);
        }
        generate(&[stmt], &ufs)
    }

    /// Full request: statement macros, optional declaration line and
    /// pragma, and the (possibly merged) loop nest. Statement ordinals
    /// restart at zero for each request.
    pub fn codegen_block(&mut self, req: &NestRequest) -> String {
        let mut entries = Vec::new();
        let mut ufs = UfTable::new();
        let mut seen_sets: Vec<&str> = Vec::new();
        for (k, spec) in req.stmts.iter().enumerate() {
            let Some(set) = self.sets.get(&spec.set) else {
                return sentinel(&spec.set);
            };
            if !seen_sets.contains(&spec.set.as_str()) {
                ufs.register_constraints(&set.iters, &set.constraints);
                seen_sets.push(&spec.set);
            }
            entries.push(NestStmt::new(
                k,
                set.iters.clone(),
                &spec.sched,
                set.constraints.clone(),
            ));
        }

        let mut code = generate(&entries, &ufs);
        let depth = max_iter_depth(&entries);
        // Only induction names the nest actually uses appear in the
        // declaration and the pragma's private clause.
        let mut used: Vec<usize> = entries
            .iter()
            .flat_map(|s| {
                s.tuple
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| matches!(d, SchedDim::It(_)))
                    .map(|(k, _)| k + 1)
            })
            .collect();
        used.sort_unstable();
        used.dedup();
        let tlist: Vec<String> = used.iter().map(|k| format!("t{}", k)).collect();
        let tlist = tlist.join(",");

        if !req.omp.is_empty() && depth > 0 {
            let pragma = if req.omp.contains("simd") {
                "#pragma omp simd".to_string()
            } else {
                format!(
                    "#pragma omp parallel for schedule({}) private({})",
                    req.omp, tlist
                )
            };
            code = format!("{}\n{}", pragma, code);
        }

        if !req.decl_type.is_empty() && depth > 0 {
            code = format!("{} {};\n{}", req.decl_type, tlist, code);
        }

        let mut defines = String::new();
        let mut k = 0;
        while k < req.stmts.len() {
            // Statements over one set share an undef/define group.
            let set = &req.stmts[k].set;
            let mut end = k + 1;
            while end < req.stmts.len() && req.stmts[end].set == *set {
                end += 1;
            }
            for n in k..end {
                defines.push_str(&format!("#undef s{}\n", n));
            }
            for (n, spec) in req.stmts.iter().enumerate().take(end).skip(k) {
                // Formals follow the schedule tuple, not the set: a
                // statement aligned under another domain's carrier loop
                // receives that prefix too.
                let iters: Vec<String> = spec
                    .sched
                    .dest
                    .iter()
                    .filter_map(|d| match d {
                        SchedDim::It(n) => Some(n.clone()),
                        SchedDim::Lit(_) => None,
                    })
                    .collect();
                defines.push_str(&statement_macro(
                    n,
                    &iters,
                    &spec.stmt,
                    spec.guard.as_deref(),
                    &spec.mappings,
                ));
                defines.push('\n');
            }
            k = end;
        }
        code = format!("{}\n{}", defines, code);

        let uf_macros = ufs.macros();
        for (lhs, rhs) in &uf_macros {
            self.macros.insert(lhs.clone(), rhs.clone());
        }
        if req.with_macros && !uf_macros.is_empty() {
            let block: Vec<String> = uf_macros
                .iter()
                .map(|(lhs, rhs)| format!("#define {} {}", lhs, rhs))
                .collect();
            code = format!("{}\n\n{}", block.join("\n"), code);
        }

        code
    }
}

/// Build one `#define sN(...)` line (without the trailing newline).
///
/// Mappings are substituted first, then the guard is folded in, then every
/// iterator token is parenthesized (tokens already wrapped are left alone),
/// and a guarded statement is finally prefixed with `if `.
pub fn statement_macro(
    ordinal: usize,
    iters: &[String],
    stmt: &str,
    guard: Option<&str>,
    mappings: &[(String, String)],
) -> String {
    let mut text = stmt.to_string();
    for (from, to) in mappings {
        text = text.replace(from, to);
    }
    if let Some(g) = guard {
        text = format!("({}) {}", g, text);
    }
    text = parenthesize(&text, iters);
    if guard.is_some() {
        text = format!("if {}", text);
    }
    format!("#define s{}({}) {}", ordinal, iters.join(","), text)
}

/// Wrap each whole-word occurrence of the given names in parentheses.
fn parenthesize(text: &str, words: &[String]) -> String {
    let bytes = text.as_bytes();
    let mut out = String::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let word = &text[start..i];
            let already = start > 0
                && bytes[start - 1] == b'('
                && i < bytes.len()
                && bytes[i] == b')';
            if !already && words.iter().any(|w| w == word) {
                out.push('(');
                out.push_str(word);
                out.push(')');
            } else {
                out.push_str(word);
            }
        } else {
            out.push(c as char);
            i += 1;
        }
    }
    out
}

/// Substitution rewriting a call-notation access to a linearized array
/// reference: 1-D indexes directly, k-D goes through `offsetk` with the
/// data space's trailing extents as strides.
pub fn access_mapping(access: &Expr, dims: &[Expr]) -> Option<(String, String)> {
    let Expr::Access { space, index, bracket } = access else {
        return None;
    };
    if *bracket || index.is_empty() {
        return None;
    }
    index[0].base_iter()?;
    let key = access.to_string();
    let mut parts = Vec::new();
    for idx in index {
        match idx.base_iter() {
            Some(base) => {
                let off = idx.int_offset();
                if off > 0 {
                    parts.push(format!("({})+{}", base, off));
                } else if off < 0 {
                    parts.push(format!("({}){}", base, off));
                } else {
                    parts.push(format!("({})", base));
                }
            }
            None => parts.push(format!("({})", idx)),
        }
    }
    let k = index.len();
    let value = if k == 1 {
        format!("{}[{}]", space, parts[0])
    } else {
        if dims.len() < k {
            log::warn!("no extents known for '{}', access left unmapped", space);
            return None;
        }
        let strides: Vec<String> = dims[1..k].iter().map(|d| format!("({})", d)).collect();
        format!("{}[offset{}({},{})]", space, k, parts.join(","), strides.join(","))
    };
    Some((key, value))
}

/// Convenience front for generating code straight from spaces and
/// computations, outside any graph.
#[derive(Debug, Clone)]
pub struct Codegen {
    bridge: PolyBridge,
    omp: String,
    data: LinkedHashMap<String, Vec<Expr>>,
}

impl Default for Codegen {
    fn default() -> Self {
        Self::new()
    }
}

impl Codegen {
    /// Parallel code with the `auto` OpenMP schedule.
    pub fn new() -> Self {
        Self::with_sched("auto")
    }

    /// Explicit schedule; empty means serial code.
    pub fn with_sched(omp: impl Into<String>) -> Self {
        Self {
            bridge: PolyBridge::new(),
            omp: omp.into(),
            data: LinkedHashMap::new(),
        }
    }

    /// Register a data space so accesses into it can be linearized.
    pub fn data(&mut self, space: &Space) -> &mut Self {
        self.data.insert(space.name.clone(), space.dims());
        self
    }

    /// Bare loop nest for a space.
    pub fn gen_space(&mut self, space: &Space) -> String {
        self.bridge.add_space(space);
        self.bridge.codegen(&space.name)
    }

    /// Nest for a registered set by name (sentinel if unknown).
    pub fn gen_set(&mut self, name: &str) -> String {
        self.bridge.codegen(name)
    }

    /// Macro block, declaration, pragma, and nest for one computation.
    pub fn gen_comp(&mut self, comp: &Comp) -> String {
        self.bridge.add_space(&comp.space);
        let mut stmts = Vec::new();
        for (k, stmt) in comp.stmts.iter().enumerate() {
            stmts.push(StmtSpec {
                set: comp.space.name.clone(),
                sched: comp.scheds[k].clone(),
                stmt: stmt.to_string(),
                guard: comp.guards[k]
                    .as_ref()
                    .map(|g| format!("{} {} {}", g.lhs, g.op.c_text(), g.rhs)),
                mappings: self.mappings_for(stmt),
            });
        }
        self.bridge.codegen_block(&NestRequest {
            stmts,
            omp: self.omp.clone(),
            decl_type: "unsigned".to_string(),
            with_macros: true,
        })
    }

    fn mappings_for(&self, stmt: &Expr) -> Vec<(String, String)> {
        let mut accesses = Vec::new();
        stmt.collect_accesses(&mut accesses);
        let mut out: Vec<(String, String)> = Vec::new();
        for a in accesses {
            if let Expr::Access { space, .. } = a {
                let dims = self.data.get(space).cloned().unwrap_or_default();
                if let Some(m) = access_mapping(a, &dims) {
                    if !out.contains(&m) {
                        out.push(m);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Expr;
    use crate::model::Space;

    #[test]
    fn test_sentinel_for_unknown_set() {
        let mut bridge = PolyBridge::new();
        let code = bridge.codegen("nope");
        assert_eq!(code, "ERROR: Set 'nope' does not exist in 'codegen'.");
        assert!(is_sentinel(&code));
    }

    #[test]
    fn test_add_normalizes() {
        let mut bridge = PolyBridge::new();
        let norm = bridge.add("Icoo := {[n,i] : 0 <= n && n < NNZ && i = row(n)}").unwrap();
        assert_eq!(norm, "Icoo := {[n,i] : 0 <= n && n < NNZ && i = row(n)}");
        assert!(bridge.get("Icoo").is_some());
        assert!(!is_sentinel(&bridge.codegen("Icoo")));
    }

    #[test]
    fn test_statement_macro_with_guard() {
        let line = statement_macro(
            0,
            &["n".to_string(), "i".to_string()],
            "N=i+1",
            Some("i >= N"),
            &[],
        );
        assert_eq!(line, "#define s0(n,i) if ((i) >= N) N=(i)+1");
    }

    #[test]
    fn test_statement_macro_func_write() {
        let line = statement_macro(
            0,
            &["i".to_string(), "n".to_string()],
            "row(n)=i",
            None,
            &[],
        );
        assert_eq!(line, "#define s0(i,n) row((n))=(i)");
    }

    #[test]
    fn test_access_mapping() {
        let i = Expr::iter("i");
        let j = Expr::iter("j");
        let a = Expr::Access {
            space: "A".to_string(),
            index: vec![i, j],
            bracket: false,
        };
        let (key, value) =
            access_mapping(&a, &[Expr::sym("I"), Expr::sym("J")]).unwrap();
        assert_eq!(key, "A(i,j)");
        assert_eq!(value, "A[offset2((i),(j),(J))]");

        let b = Expr::Access {
            space: "B".to_string(),
            index: vec![Expr::iter("n")],
            bracket: false,
        };
        let (key, value) = access_mapping(&b, &[Expr::sym("NNZ")]).unwrap();
        assert_eq!(key, "B(n)");
        assert_eq!(value, "B[(n)]");
    }

    #[test]
    fn test_gen_comp_mttkrp() {
        use crate::model::Comp;
        let n = Expr::iter("n");
        let i = Expr::iter("i");
        let j = Expr::iter("j");
        let k = Expr::iter("k");
        let l = Expr::iter("l");
        let coo = Space::new("Icoo")
            .with(n.clone().in_range(0, Expr::sym("NNZ")))
            .with(i.clone().equals(Expr::func("ind0", vec![n.clone()])))
            .with(j.clone().equals(Expr::func("ind1", vec![n.clone()])))
            .with(k.clone().equals(Expr::func("ind2", vec![n.clone()])))
            .with(l.clone().in_range(0, Expr::sym("L")));
        let a = Space::data("A", vec![Expr::sym("I"), Expr::sym("J")]);
        let b = Space::data("B", vec![Expr::sym("NNZ")]);
        let c = Space::data("C", vec![Expr::sym("K"), Expr::sym("J")]);
        let d = Space::data("D", vec![Expr::sym("L"), Expr::sym("J")]);
        let mttkrp = Comp::new("mttkrp", coo).stmt(
            a.at(vec![i, j.clone()]).add_assign(
                b.at(vec![n]) * c.at(vec![k, j.clone()]) * d.at(vec![l, j]),
            ),
        );
        let mut cg = Codegen::new();
        cg.data(&a).data(&b).data(&c).data(&d);
        let result = cg.gen_comp(&mttkrp);
        let expected = "#define ind0(n) ind0[(n)]\n\
                        #define ind1(n) ind1[(n)]\n\
                        #define ind2(n) ind2[(n)]\n\n\
                        #undef s0\n\
                        #define s0(n,i,j,k,l) A[offset2((i),(j),(J))]+=B[(n)]*C[offset2((k),(j),(J))]*D[offset2((l),(j),(J))]\n\n\
                        unsigned t1,t2,t3,t4,t5;\n\
                        #pragma omp parallel for schedule(auto) private(t1,t2,t3,t4,t5)\n\
                        for(t1 = 0; t1 <= NNZ-1; t1++) {\n\
                        \x20 t2=ind0(t1);\n\
                        \x20 t3=ind1(t1);\n\
                        \x20 t4=ind2(t1);\n\
                        \x20 for(t5 = 0; t5 <= L-1; t5++) {\n\
                        \x20   s0(t1,t2,t3,t4,t5);\n\
                        \x20 }\n\
                        }\n";
        assert_eq!(result, expected);
    }

    #[test]
    fn test_gen_comp_scalar() {
        use crate::model::Comp;
        let insp = Comp::new("inspN", Space::new("I_N")).stmt(
            Expr::sym("N").assign(Expr::func("row", vec![Expr::sym("NNZ") - 1]) + 1),
        );
        let mut cg = Codegen::with_sched("");
        let result = cg.gen_comp(&insp);
        assert_eq!(result, "#undef s0\n#define s0() N=row(NNZ-1)+1\n\ns0();\n");
    }
}
