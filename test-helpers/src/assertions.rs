//! Defines assertion helpers for integration tests returning `eyre::Result`

/// Assert that a boolean value is true, return an error otherwise
#[macro_export]
macro_rules! assert_true_result {
    ($x:expr) => {
        if $x {
            Ok(())
        } else {
            Err(eyre::eyre!(
                "Expected `{} == true`, got `false`",
                stringify!($x)
            ))
        }
    };
}

/// Assert that two values are equal, return an error otherwise
#[macro_export]
macro_rules! assert_eq_result {
    ($x:expr, $y:expr) => {
        if $x == $y {
            Ok(())
        } else {
            Err(eyre::eyre!(
                "Expected `{} == {}`, got `{:?} == {:?}`",
                stringify!($x),
                stringify!($y),
                $x,
                $y
            ))
        }
    };
}

/// Assert that a value matches a pattern, return an error otherwise
#[macro_export]
macro_rules! assert_matches_result {
    ($x:expr, $pat:pat) => {
        match $x {
            $pat => Ok(()),
            ref other => Err(eyre::eyre!(
                "Expected `{}` to match `{}`, got `{:?}`",
                stringify!($x),
                stringify!($pat),
                other
            )),
        }
    };
}
