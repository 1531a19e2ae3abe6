//! Dot products of mixed operands, column/row-wise variants.

use approx::assert_relative_eq;
use nalgebra::DMatrix;
use revtape::{columns_dot_product, dot_product, rows_dot_product, AdError, Session, Var};

#[test]
fn tracked_times_tracked() {
    let _s = Session::new();
    let a = revtape::var::vars(&[1.0, 2.0, 3.0]);
    let b = revtape::var::vars(&[4.0, -5.0, 6.0]);
    let d = dot_product(&a, &b).unwrap();
    assert_eq!(d.value(), 12.0);
    d.grad().unwrap();
    assert_eq!(revtape::var::values(&b), a.iter().map(|v| v.adj()).collect::<Vec<_>>());
    assert_eq!(revtape::var::values(&a), b.iter().map(|v| v.adj()).collect::<Vec<_>>());
}

#[test]
fn constant_on_either_side() {
    let _s = Session::new();
    let a = revtape::var::vars(&[1.0, 2.0]);
    let c = [3.0, -1.0];
    let left = dot_product(&c, &a).unwrap();
    let right = dot_product(&a, &c).unwrap();
    assert_eq!(left.value(), right.value());
    assert_eq!(left.grad_wrt(&a).unwrap(), c.to_vec());
    assert_eq!(right.grad_wrt(&a).unwrap(), c.to_vec());
}

#[test]
fn self_dot_doubles_gradient() {
    let _s = Session::new();
    let a = revtape::var::vars(&[1.5, -0.5]);
    let d = dot_product(&a, &a).unwrap();
    assert_eq!(d.grad_wrt(&a).unwrap(), vec![3.0, -1.0]);
}

#[test]
fn matches_elementwise_expansion() {
    let xs = [0.3, -1.2, 2.5, 0.8];
    let ys = [1.1, 0.4, -0.7, 2.0];
    let packed = {
        let _s = Session::new();
        let a = revtape::var::vars(&xs);
        let b = revtape::var::vars(&ys);
        let f = dot_product(&a, &b).unwrap().sin();
        let wrt: Vec<Var> = a.iter().chain(&b).copied().collect();
        f.grad_wrt(&wrt).unwrap()
    };
    let expanded = {
        let _s = Session::new();
        let a = revtape::var::vars(&xs);
        let b = revtape::var::vars(&ys);
        let f = a.iter().zip(&b).map(|(&x, &y)| x * y).sum::<Var>().sin();
        let wrt: Vec<Var> = a.iter().chain(&b).copied().collect();
        f.grad_wrt(&wrt).unwrap()
    };
    for (p, e) in packed.iter().zip(&expanded) {
        assert_relative_eq!(*p, *e, max_relative = 1e-12);
    }
}

#[test]
fn two_constants_give_a_leaf() {
    let session = Session::new();
    let d = dot_product(&[1.0, 2.0], &[3.0, 4.0]).unwrap();
    assert_eq!(d.value(), 11.0);
    assert_eq!(session.tape_len().unwrap(), 1);
    assert_eq!(session.stats().unwrap().values_used, 0);
}

#[test]
fn empty_vectors() {
    let _s = Session::new();
    let a: Vec<Var> = Vec::new();
    let d = dot_product(&a, &[] as &[f64]).unwrap();
    assert_eq!(d.value(), 0.0);
    d.grad().unwrap();
}

#[test]
fn size_mismatch_records_nothing() {
    let session = Session::new();
    let a = revtape::var::vars(&[1.0, 2.0, 3.0]);
    let len = session.tape_len().unwrap();
    let err = dot_product(&a, &[1.0, 2.0]).unwrap_err();
    assert_eq!(
        err,
        AdError::SizeMismatch {
            function: "dot_product",
            lhs: "v1",
            lhs_len: 3,
            rhs: "v2",
            rhs_len: 2
        }
    );
    assert_eq!(session.tape_len().unwrap(), len);
}

#[test]
fn columns_and_rows() {
    let _s = Session::new();
    let a = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).map(Var::new);
    let b = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, -1.0, 2.0, 1.0, 0.5]);

    let cols = columns_dot_product(&a, &b).unwrap();
    assert_eq!(cols.len(), 3);
    assert_eq!(cols[0].value(), 1.0 + 8.0);
    assert_eq!(cols[1].value(), 5.0);
    assert_eq!(cols[2].value(), -3.0 + 3.0);

    let rows = rows_dot_product(&a, &b).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value(), 1.0 - 3.0);
    assert_eq!(rows[1].value(), 8.0 + 5.0 + 3.0);

    rows[1].grad().unwrap();
    assert_eq!(a[(1, 0)].adj(), 2.0);
    assert_eq!(a[(1, 2)].adj(), 0.5);
    assert_eq!(a[(0, 0)].adj(), 0.0);
}

#[test]
fn shape_mismatch_is_reported() {
    let session = Session::new();
    let a = DMatrix::from_element(2, 3, 1.0).map(Var::new);
    let b = DMatrix::from_element(3, 3, 1.0);
    let len = session.tape_len().unwrap();
    assert!(matches!(
        columns_dot_product(&a, &b),
        Err(AdError::SizeMismatch { function: "columns_dot_product", .. })
    ));
    let c = DMatrix::from_element(2, 2, 1.0);
    assert!(matches!(
        rows_dot_product(&a, &c),
        Err(AdError::SizeMismatch { lhs: "columns of v1", rhs_len: 2, .. })
    ));
    assert_eq!(session.tape_len().unwrap(), len);
}

#[test]
fn no_session() {
    assert_eq!(
        dot_product(&[1.0], &[2.0]).unwrap_err(),
        AdError::NoActiveSession
    );
}
