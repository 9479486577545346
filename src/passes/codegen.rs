//! Codegen pass: renders the whole routine.
//!
//! Data nodes are visited first and classified into routine parameters
//! (const input pointers, output pointers, by-value scalars) and local
//! temporaries (scalar declarations, heap or static arrays with matching
//! frees). Computation nodes then each contribute one body block: a label
//! comment, the re-`#define`d statement macros, an optional parallel
//! pragma, and the loop nest from the bridge. The header carries the fixed
//! numeric-utility macros plus every uninterpreted-function macro any nest
//! used; the footer frees temporaries, returns the configured datum, and
//! `#undef`s the whole vocabulary.

use linked_hash_map::LinkedHashMap;

use crate::algebra::Expr;
use crate::bridge::{access_mapping, is_sentinel, NestRequest, PolyBridge, StmtSpec};
use crate::graph::{FlowGraph, MemAlloc, NodeId};
use crate::utils::errors::{CodegenError, FlowResult};

use super::GraphVisitor;

const FIXED_DEFINES: &str = "\
#define min(x,y) (((x)<(y))?(x):(y))
#define max(x,y) (((x)>(y))?(x):(y))
#define abs(x) ((x)<0?-(x):(x))
#define absmin(x,y) ((x)=min(abs((x)),abs((y))))
#define absmax(x,y) ((x)=max(abs((x)),abs((y))))
#define floord(x,y) ((x)/(y))
#define sgn(x) ((x)<0?-1:1)
#define offset2(i,j,M) ((j)+(i)*(M))
#define offset3(i,j,k,M,N) ((k)+((j)+(i)*(M))*(N))
#define offset4(i,j,k,l,M,N,P) ((l)+((k)+((j)+(i)*(M))*(N))*(P))
#define arrinit(ptr,val,size) for(unsigned __i__=0;__i__<(size);__i__++) (ptr)[__i__]=(val)
#define arrprnt(name,arr,size) {\\
fprintf(stderr,\"%s={\",(name));\\
for(unsigned __i__=0;__i__<(size);__i__++) fprintf(stderr,\"%lg,\",(arr)[__i__]);\\
fprintf(stderr,\"}\\n\");}
";

const FIXED_MACRO_NAMES: &[&str] = &[
    "min", "max", "abs", "absmin", "absmax", "floord", "sgn", "offset2", "offset3",
    "offset4", "arrinit", "arrprnt",
];

#[derive(Debug, Default)]
pub struct CodegenPass {
    bridge: PolyBridge,
    dims: LinkedHashMap<String, Vec<Expr>>,
    params: Vec<String>,
    allocs: Vec<String>,
    frees: Vec<String>,
    body: Vec<String>,
    niters: usize,
    output: String,
}

impl CodegenPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the routine for this graph.
    pub fn run(mut self, graph: &mut FlowGraph) -> FlowResult<String> {
        self.walk(graph)?;
        Ok(self.output)
    }

    fn mappings_for(&self, stmt: &Expr) -> Vec<(String, String)> {
        let mut accesses = Vec::new();
        stmt.collect_accesses(&mut accesses);
        let mut out: Vec<(String, String)> = Vec::new();
        for a in accesses {
            if let Expr::Access { space, .. } = a {
                let dims = self.dims.get(space).cloned().unwrap_or_default();
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

impl GraphVisitor for CodegenPass {
    fn visit_data(&mut self, graph: &mut FlowGraph, id: NodeId) -> FlowResult<()> {
        let Some(d) = graph.data(id) else {
            return Ok(());
        };
        let label = d.label.clone();
        let ty = d.datatype.clone();
        let scalar = d.is_scalar();
        let size = d.size.to_string();
        let node_defval = d.defval.clone();
        let static_alloc = d.alloc == MemAlloc::Static;
        self.dims.insert(label.clone(), d.space.dims());

        let is_ret = graph.config.return_name == label;
        let tile_size = graph.config.tile_size;
        let defval = if node_defval.is_empty() {
            graph.config.default_val.clone()
        } else {
            node_defval
        };
        let source = graph.is_source(id);
        let output = graph.is_output(id);

        let alloc = if !is_ret && source && !output {
            let star = if scalar { "" } else { "*" };
            self.params.push(format!("const {}{} {}", ty, star, label));
            MemAlloc::None
        } else if !is_ret && output {
            // Outputs are passed by pointer even when scalar.
            self.params.push(format!("{}* {}", ty, label));
            MemAlloc::None
        } else if scalar {
            let init = if defval.is_empty() { "0" } else { &defval };
            self.allocs.push(format!("    {} {} = {};", ty, label, init));
            MemAlloc::Auto
        } else if static_alloc {
            let init = if defval.is_empty() { "0" } else { &defval };
            self.allocs
                .push(format!("    static {} {}[{}] = {{{}}};", ty, label, size, init));
            MemAlloc::Static
        } else {
            let line = if defval == "0" {
                format!("    {}* {} = ({}*) calloc(({}),sizeof({}));", ty, label, ty, size, ty)
            } else if tile_size > 0 {
                format!(
                    "    {}* {} = ({}*) aligned_alloc({},({})*sizeof({}));",
                    ty, label, ty, tile_size, size, ty
                )
            } else {
                format!("    {}* {} = ({}*) malloc(({})*sizeof({}));", ty, label, ty, size, ty)
            };
            self.allocs.push(line);
            if !defval.is_empty() && defval != "0" {
                self.allocs.push(format!("    arrinit({},{},{});", label, defval, size));
            }
            self.frees.push(format!("    free({});", label));
            MemAlloc::Dynamic
        };
        if let Some(d) = graph.data_mut(id) {
            d.alloc = alloc;
        }
        Ok(())
    }

    fn visit_comp(&mut self, graph: &mut FlowGraph, id: NodeId) -> FlowResult<()> {
        let Some(node) = graph.comp(id) else {
            return Ok(());
        };
        let label = node.label.clone();
        let mut stmts = Vec::new();
        for comp in node.all_comps() {
            self.bridge.add_space(&comp.space);
            for (k, stmt) in comp.stmts.iter().enumerate() {
                self.niters = self.niters.max(comp.scheds[k].depth());
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
        }
        let req = NestRequest {
            stmts,
            omp: graph.config.omp_sched.clone(),
            decl_type: String::new(),
            with_macros: false,
        };
        let code = self.bridge.codegen_block(&req);
        if is_sentinel(&code) {
            return Err(CodegenError::sentinel(code).into());
        }
        self.body.push(format!("// {}\n{}", label, code));
        Ok(())
    }

    fn finish(&mut self, graph: &mut FlowGraph) -> FlowResult<()> {
        let cfg = &graph.config;
        let mut out = String::new();
        for inc in ["stdio", "stdlib", "stdint", "math"] {
            out.push_str(&format!("#include <{}.h>\n", inc));
        }
        if cfg.profile {
            out.push_str("#include <sys/time.h>\n");
        }
        out.push('\n');
        out.push_str(FIXED_DEFINES);
        for (lhs, rhs) in self.bridge.macros() {
            out.push_str(&format!("#define {} {}\n", lhs, rhs));
        }
        out.push('\n');

        self.params.sort();
        let sig = format!("{} {}({})", cfg.return_type(), cfg.name, self.params.join(", "));
        out.push_str(&format!("{};\n", sig));
        out.push_str(&format!("inline {} {{\n", sig));
        if self.niters > 0 {
            let ts: Vec<String> = (1..=self.niters).map(|k| format!("t{}", k)).collect();
            out.push_str(&format!("    {} {};\n", cfg.index_type, ts.join(",")));
        }
        for line in &self.allocs {
            out.push_str(line);
            out.push('\n');
        }
        for block in &self.body {
            out.push('\n');
            out.push_str(block);
        }
        out.push('\n');
        for line in &self.frees {
            out.push_str(line);
            out.push('\n');
        }
        if !cfg.return_name.is_empty() {
            if !self.frees.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("    return ({});\n", cfg.return_name));
        }
        out.push_str(&format!("}}    // {}\n", cfg.name));
        out.push('\n');
        for name in FIXED_MACRO_NAMES {
            out.push_str(&format!("#undef {}\n", name));
        }
        for lhs in self.bridge.macros().keys() {
            let name = lhs.split('(').next().unwrap_or(lhs);
            out.push_str(&format!("#undef {}\n", name));
        }
        self.output = out;
        Ok(())
    }
}
