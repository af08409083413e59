#![no_main]
use libfuzzer_sys::fuzz_target;
use pathfinder_dag::{Constant, Dag, ExprId, PredOp, VarId};

// Every byte pair is one constructor applied to earlier results.
fuzz_target!(|data: &[u8]| {
    let mut dag = Dag::new();
    let mut exprs: Vec<ExprId> = vec![dag.var(VarId(0)), dag.cst(Constant::SP)];
    for pair in data.chunks_exact(2) {
        let (op, arg) = (pair[0], pair[1]);
        let a = exprs[arg as usize % exprs.len()];
        let b = exprs[(arg as usize / 7) % exprs.len()];
        let k = i32::from(arg as i8);
        let e = match op % 14 {
            0 => dag.var(VarId(k % 4)),
            1 => dag.cst(k),
            2 => dag.add(a, b),
            3 => dag.sub(a, b),
            4 => dag.mul(a, b),
            5 => dag.div(a, b),
            6 => dag.modulo(a, b),
            7 => dag.neg(a),
            8 => dag.add_const(a, k),
            9 => dag.mul_const(a, k),
            10 => dag.mul_high(a, b),
            11 => dag.euclid_mod(a, 1 << (arg % 5)),
            12 => dag.floor_div(a, 1 << (arg % 5)),
            _ => {
                let p = dag.pred(PredOp::Le, a, b);
                let _ = dag.is_tautology(p);
                let _ = dag.parse_affine(a);
                dag.cmp(a, b)
            }
        };
        let _ = dag.show(e).to_string();
        exprs.push(e);
    }
});
