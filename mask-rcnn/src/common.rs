pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use bbox::{prelude::*, Transform, HW, XYXY};
pub use getset::{CopyGetters, Getters};
pub use itertools::{chain, izip, Itertools as _};
pub use log::{debug, warn};
pub use ndarray::{
    s, Array1, Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView3, ArrayView4, Axis,
};
pub use noisy_float::prelude::*;
pub use rand::{seq::index, Rng};
pub use rayon::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    iter,
    path::{Path, PathBuf},
};
