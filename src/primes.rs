/// Check if `n` is prime.
///
/// Trial division by the candidates `6k - 1` and `6k + 1` up to the
/// square root of `n`. Never panics: every `i64`, negatives included,
/// gets an answer.
#[must_use]
pub fn is_prime(n: i64) -> bool {
    if n <= 1 {
        return false;
    }
    if n <= 3 {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }

    #[allow(clippy::cast_sign_loss)]
    let n = n as u64;

    // i <= n / i instead of i * i <= n, the square overflows near i64::MAX
    let mut i = 5_u64;
    while i <= n / i {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }

    true
}
