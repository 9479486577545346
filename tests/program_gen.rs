//! Whole-routine generation for inspector and solver style programs.

use anyhow::Result;
use pdflow::prelude::*;

fn coo_space() -> Space {
    let n = Expr::iter("n");
    let i = Expr::iter("i");
    Space::new("Icoo")
        .with(n.clone().in_range(0, Expr::sym("NNZ")))
        .with(i.equals(Expr::func("row", vec![n])))
}

/// COO -> CSR row-pointer inspector: a guarded scan for the row count, a
/// counting pass into the pointer array, and a closed-form scalar variant.
#[test]
fn test_coo_csr_inspector_program() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let n = Expr::iter("n");
    let i = Expr::iter("i");
    let mut b = Builder::new("coo_csr");
    b.data_typed(&Space::data("rp", vec![Expr::sym("N") + 1]), "unsigned");
    b.add(
        Comp::new("maxrow", coo_space())
            .guarded(i.clone().ge(Expr::sym("N")), Expr::sym("N").assign(i.clone() + 1)),
    )?;
    b.add(
        Comp::new("count", coo_space())
            .stmt(Expr::func("rp", vec![i + 1]).assign(n + 1)),
    )?;
    b.add(Comp::new("nrow", Space::new("In")).stmt(
        Expr::sym("N").assign(Expr::func("row", vec![Expr::sym("NNZ") - 1]) + 1),
    ))?;
    let code = b.codegen()?;

    assert!(code.contains(
        "void coo_csr(const unsigned NNZ, const unsigned* row, unsigned* rp);\n"
    ));
    assert!(code.contains("#define row(n) row[(n)]\n"));
    // Row count stays a routine-local scalar.
    assert!(code.contains("    unsigned N = 0;\n"));
    assert!(code.contains(
        "// maxrow\n\
         #undef s0\n\
         #define s0(n,i) if ((i) >= N) N=(i)+1\n\
         \n\
         for(t1 = 0; t1 <= NNZ-1; t1++) {\n\
         \x20 t2=row(t1);\n\
         \x20 s0(t1,t2);\n\
         }\n"
    ));
    assert!(code.contains("#define s0(n,i) rp((i)+1)=(n)+1\n"));
    // The closed-form variant runs outside any loop.
    assert!(code.contains(
        "// nrow\n\
         #undef s0\n\
         #define s0() N=row(NNZ-1)+1\n\
         \n\
         s0();\n"
    ));
    Ok(())
}

/// Fusing a COO matvec with a dense dot product: the dense statement gains
/// the sparse carrier prefix and both run inside one merged loop.
#[test]
fn test_sparse_dense_fusion_shares_carrier_loop() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let n = Expr::iter("n");
    let i = Expr::iter("i");
    let j = Expr::iter("j");
    let coo = Space::new("Icoo")
        .with(n.clone().in_range(0, Expr::sym("NNZ")))
        .with(i.clone().equals(Expr::func("row", vec![n.clone()])))
        .with(j.clone().equals(Expr::func("col", vec![n.clone()])));
    let dense = Space::new("I").with(Expr::iter("i").in_range(0, Expr::sym("N")));

    let a = Space::data("A", vec![Expr::sym("NNZ")]);
    let d = Space::data("d", vec![Expr::sym("N")]);
    let s = Space::data("s", vec![Expr::sym("N")]);
    let ds = Space::scalar("ds");

    let cfg = RoutineConfig::new("fused_spmv")
        .returns("ds")
        .with_outputs(&["s"])
        .default_value("0")
        .omp("auto");
    let mut b = Builder::with_config(cfg);
    for sp in [&a, &d, &s] {
        b.data(sp);
    }
    b.data(&ds);
    b.add(Comp::new("spmv", coo).stmt(
        s.idx(vec![i.clone()]).add_assign(a.idx(vec![n]) * d.idx(vec![j])),
    ))?;
    let vi = Expr::iter("i");
    b.add(Comp::new("ddot", dense).stmt(
        ds.sref().add_assign(d.idx(vec![vi.clone()]) * s.idx(vec![vi])),
    ))?;
    b.fuse(&["spmv", "ddot"])?;
    let code = b.codegen()?;

    assert!(code.contains("#define s0(n,i,j) s[(i)]+=A[(n)]*d[(j)]\n"));
    assert!(code.contains("#define s1(n,i) ds+=d[(i)]*s[(i)]\n"));
    assert!(code.contains(
        "for(t1 = 0; t1 <= NNZ-1; t1++) {\n\
         \x20 t2=row(t1);\n\
         \x20 t4=col(t1);\n\
         \x20 s0(t1,t2,t4);\n\
         \x20 s1(t1,t2);\n\
         }\n"
    ));
    assert!(code.contains(
        "#pragma omp parallel for schedule(auto) private(t1,t2,t4)\n"
    ));
    Ok(())
}

/// A conjugate-gradient-shaped routine: a sparse matvec fused with two dot
/// products, scalar steps, fused vector updates, and a returned residual.
#[test]
fn test_conjgrad_style_routine() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let n = Expr::iter("n");
    let i = Expr::iter("i");
    let j = Expr::iter("j");
    let coo = Space::new("Icoo")
        .with(n.clone().in_range(0, Expr::sym("NNZ")))
        .with(i.clone().equals(Expr::func("row", vec![n.clone()])))
        .with(j.clone().equals(Expr::func("col", vec![n.clone()])));
    let dense = Space::new("I").with(Expr::iter("i").in_range(0, Expr::sym("N")));

    let a = Space::data("A", vec![Expr::sym("NNZ")]);
    let d = Space::data("d", vec![Expr::sym("N")]);
    let r = Space::data("r", vec![Expr::sym("N")]);
    let x = Space::data("x", vec![Expr::sym("N")]);
    let s = Space::data("s", vec![Expr::sym("N")]);
    let ds = Space::scalar("ds");
    let rs0 = Space::scalar("rs0");
    let alpha = Space::scalar("alpha");
    let rs = Space::scalar("rs");
    let beta = Space::scalar("beta");

    let cfg = RoutineConfig::new("conj_grad")
        .returns("rs")
        .with_outputs(&["d", "r"])
        .default_value("0")
        .double_precision()
        .omp("auto");
    let mut b = Builder::with_config(cfg);
    for sp in [&a, &d, &r, &x, &s] {
        b.data(sp);
    }
    for sp in [&ds, &rs0, &alpha, &rs, &beta] {
        b.data(sp);
    }

    b.add(Comp::new("spmv", coo).stmt(
        s.idx(vec![i.clone()]).add_assign(a.idx(vec![n]) * d.idx(vec![j])),
    ))?;
    let vi = Expr::iter("i");
    b.add(Comp::new("ddot", dense.clone()).stmt(
        ds.sref().add_assign(d.idx(vec![vi.clone()]) * s.idx(vec![vi.clone()])),
    ))?;
    b.add(Comp::new("rdot0", dense.clone()).stmt(
        rs0.sref().add_assign(r.idx(vec![vi.clone()]) * r.idx(vec![vi.clone()])),
    ))?;
    b.add(Comp::new("adiv", Space::new("Ia"))
        .stmt(alpha.sref().assign(rs0.sref() / ds.sref())))?;
    b.add(Comp::new("xadd", dense.clone()).stmt(
        x.idx(vec![vi.clone()]).add_assign(alpha.sref() * d.idx(vec![vi.clone()])),
    ))?;
    b.add(Comp::new("rsub", dense.clone()).stmt(
        r.idx(vec![vi.clone()]).sub_assign(alpha.sref() * s.idx(vec![vi.clone()])),
    ))?;
    b.add(Comp::new("rdot", dense.clone()).stmt(
        rs.sref().add_assign(r.idx(vec![vi.clone()]) * r.idx(vec![vi.clone()])),
    ))?;
    b.add(Comp::new("bdiv", Space::new("Ib"))
        .stmt(beta.sref().assign(rs.sref() / rs0.sref())))?;
    b.add(Comp::new("dmul", dense.clone())
        .stmt(d.idx(vec![vi.clone()]).mul_assign(beta.sref())))?;
    b.add(Comp::new("dadd", dense)
        .stmt(d.idx(vec![vi.clone()]).add_assign(r.idx(vec![vi]))))?;

    b.fuse(&["spmv", "ddot", "rdot0"])?;
    b.fuse(&["xadd", "rsub", "rdot"])?;
    b.fuse(&["dmul", "dadd"])?;
    b.perfmodel()?;
    let code = b.codegen()?;

    assert!(code.contains(
        "double conj_grad(const double* A, const unsigned N, const unsigned NNZ, \
         const unsigned* col, const unsigned* row, double* d, double* r, double* x)"
    ));
    // The matvec result is a zero-filled heap temporary; scalars are locals.
    assert!(code.contains("    double* s = (double*) calloc((N),sizeof(double));\n"));
    assert!(code.contains("    double ds = 0;\n"));
    assert!(code.contains("    double alpha = 0;\n"));
    assert!(code.contains("    free(s);\n"));
    assert!(code.contains("\n    return (rs);\n"));
    assert!(code.contains("}    // conj_grad\n"));
    assert!(code.contains("// spmv+ddot+rdot0\n"));
    assert!(code.contains("// xadd+rsub+rdot\n"));
    assert!(code.contains("#pragma omp parallel for schedule(auto) private("));
    // Fused blocks re-number their statement macros from zero.
    assert!(code.contains("#define s1("));
    assert!(code.contains("#define s2("));
    assert!(code.contains("#define s0(i) x[(i)]+=alpha*d[(i)]\n"));

    let g = b.graph();
    let fused = g.lookup("spmv+ddot+rdot0").unwrap();
    let node = g.comp(fused).unwrap();
    assert_eq!(node.attrs.get("flops").map(String::as_str), Some("6"));
    assert!(node.attrs.contains_key("fsize_in"));
    assert!(node.attrs.get("fusion").is_some());
    Ok(())
}
